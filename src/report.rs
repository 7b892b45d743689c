//! The monthly group report: the filled forms of a selection merged into a
//! single document, followed by summary pages listing the participants
//! grouped by unemployment office.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::debug;

use crate::dates::TargetMonth;
use crate::error::GenerateError;
use crate::form;
use crate::template::{PAGE_HEIGHT_PT, PAGE_WIDTH_PT};

// ============================================================================
// Constants
// ============================================================================

pub const SUMMARY_TITLE: &str = "Récapitulatif - Liste des Caisses de Chômage / MMT";
const CONTINUED_TITLE: &str = "Récapitulatif (suite)";
/// Group name for participants without an office.
pub const UNDEFINED_OFFICE: &str = "Non défini";

const REGULAR_FONT: &str = "F1";
const BOLD_FONT: &str = "F2";

const LEFT_X: f32 = 50.0;
const ENTRY_X: f32 = 70.0;
const TOP_OFFSET: f32 = 50.0;
const GROUP_MIN_Y: f32 = 60.0;
const ENTRY_MIN_Y: f32 = 40.0;
const BAND_X: f32 = 40.0;
const BAND_WIDTH: f32 = 520.0;
const BAND_HEIGHT: f32 = 20.0;

const MAX_TREE_DEPTH: usize = 32;
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// `MMT_Export_Groupe_{YYYY-MM}.pdf`
pub fn report_file_name(month: TargetMonth) -> String {
    format!("MMT_Export_Groupe_{}.pdf", month)
}

/// One line of the summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
    /// `Lastname Firstname`
    pub name: String,
    pub office: String,
}

/// Entries grouped by office, both levels sorted. Blank offices and `-`
/// land in [`UNDEFINED_OFFICE`].
pub fn group_by_office(entries: &[SummaryEntry]) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries {
        let office = match entry.office.trim() {
            "" | "-" => UNDEFINED_OFFICE.to_string(),
            other => other.to_string(),
        };
        groups.entry(office).or_default().push(entry.name.clone());
    }
    for names in groups.values_mut() {
        names.sort();
    }
    groups
}

// ============================================================================
// Summary pages
// ============================================================================

struct SummaryWriter {
    finished: Vec<Vec<Operation>>,
    page: Vec<Operation>,
    y: f32,
}

impl SummaryWriter {
    fn new() -> Self {
        Self { finished: Vec::new(), page: Vec::new(), y: PAGE_HEIGHT_PT - TOP_OFFSET }
    }

    fn text(&mut self, x: f32, font: &str, size: f32, gray: f32, text: &str) {
        self.page.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(font.as_bytes().to_vec()), Object::Real(size)]),
            Operation::new("g", vec![Object::Real(gray)]),
            Operation::new("Td", vec![Object::Real(x), Object::Real(self.y)]),
            Operation::new("Tj", vec![Object::String(form::win_ansi(text), StringFormat::Literal)]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn band(&mut self) {
        self.page.extend([
            Operation::new("q", vec![]),
            Operation::new("g", vec![Object::Real(0.9)]),
            Operation::new(
                "re",
                vec![
                    Object::Real(BAND_X),
                    Object::Real(self.y - 5.0),
                    Object::Real(BAND_WIDTH),
                    Object::Real(BAND_HEIGHT),
                ],
            ),
            Operation::new("f", vec![]),
            Operation::new("Q", vec![]),
        ]);
    }

    fn new_page(&mut self) {
        self.finished.push(std::mem::take(&mut self.page));
        self.y = PAGE_HEIGHT_PT - TOP_OFFSET;
        self.text(LEFT_X, REGULAR_FONT, 10.0, 0.0, CONTINUED_TITLE);
        self.y -= 30.0;
    }

    fn finish(mut self) -> Vec<Vec<Operation>> {
        self.finished.push(self.page);
        self.finished
    }
}

/// Content operations of each summary page.
fn summary_operations(entries: &[SummaryEntry], generated_on: NaiveDate) -> Vec<Vec<Operation>> {
    let mut writer = SummaryWriter::new();
    writer.text(LEFT_X, BOLD_FONT, 16.0, 0.0, SUMMARY_TITLE);
    writer.y -= 20.0;
    writer.text(LEFT_X, REGULAR_FONT, 10.0, 0.0, &format!("Généré le: {}", generated_on.format("%d.%m.%Y")));
    writer.y -= 40.0;

    for (office, names) in group_by_office(entries) {
        if writer.y < GROUP_MIN_Y {
            writer.new_page();
        }
        writer.band();
        writer.text(LEFT_X, BOLD_FONT, 11.0, 0.0, &office);
        writer.y -= 25.0;

        for name in names {
            if writer.y < ENTRY_MIN_Y {
                writer.new_page();
                writer.text(LEFT_X, BOLD_FONT, 11.0, 0.4, &format!("{office} (suite)"));
                writer.y -= 20.0;
            }
            writer.text(ENTRY_X, REGULAR_FONT, 10.0, 0.0, &format!("- {name}"));
            writer.y -= 15.0;
        }
        writer.y -= 10.0;
    }
    writer.finish()
}

// ============================================================================
// Merging
// ============================================================================

/// Copy attributes a page inherits from its page tree onto the page itself,
/// so it can be re-parented.
fn pin_inherited_attributes(doc: &mut Document, page: ObjectId) -> Result<(), lopdf::Error> {
    let mut inherited = Vec::new();
    {
        let dict = doc.get_object(page)?.as_dict()?;
        for key in INHERITABLE {
            if dict.has(key) {
                continue;
            }
            let mut node = dict.get(b"Parent").and_then(Object::as_reference).ok();
            for _ in 0..MAX_TREE_DEPTH {
                let Some(id) = node else { break };
                let Ok(parent) = doc.get_object(id).and_then(Object::as_dict) else { break };
                if let Ok(value) = parent.get(key) {
                    inherited.push((key.to_vec(), value.clone()));
                    break;
                }
                node = parent.get(b"Parent").and_then(Object::as_reference).ok();
            }
        }
    }
    let dict = doc.get_object_mut(page)?.as_dict_mut()?;
    for (key, value) in inherited {
        dict.set(key, value);
    }
    Ok(())
}

/// Concatenate `documents` page by page and append the summary pages.
/// Interactive forms of the inputs are not carried over.
pub fn build_report(
    documents: Vec<Document>,
    entries: &[SummaryEntry],
    generated_on: NaiveDate,
) -> Result<Document, GenerateError> {
    let merge_err = |e: lopdf::Error| GenerateError::Serialize(format!("merging failed: {e}"));

    let mut merged = Document::with_version("1.5");
    let pages_id = (1, 0);
    let mut next_id = 2;
    let mut page_refs = Vec::new();

    for mut doc in documents {
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let catalog = doc.trailer.get(b"Root").and_then(Object::as_reference).ok();
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        for page in &pages {
            pin_inherited_attributes(&mut doc, *page).map_err(merge_err)?;
            doc.get_object_mut(*page)
                .and_then(Object::as_dict_mut)
                .map_err(merge_err)?
                .set("Parent", Object::Reference(pages_id));
            page_refs.push(Object::Reference(*page));
        }

        for (id, object) in doc.objects {
            let is_tree_node = matches!(
                &object,
                Object::Dictionary(d) if matches!(d.get(b"Type"), Ok(Object::Name(n)) if n == b"Pages")
            );
            if Some(id) == catalog || is_tree_node {
                continue;
            }
            merged.objects.insert(id, object);
        }
    }
    merged.max_id = next_id;

    let summary = summary_operations(entries, generated_on);
    let regular = merged.add_object(form::helvetica());
    let bold = merged.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    for operations in summary {
        let content = Content { operations }
            .encode()
            .map_err(|e| GenerateError::Serialize(e.to_string()))?;
        let content_id = merged.add_object(Stream::new(Dictionary::new(), content));
        let page_id = merged.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(PAGE_WIDTH_PT), Object::Real(PAGE_HEIGHT_PT)],
            "Contents" => Object::Reference(content_id),
            "Resources" => dictionary! {
                "Font" => dictionary! {
                    REGULAR_FONT => Object::Reference(regular),
                    BOLD_FONT => Object::Reference(bold),
                },
            },
        });
        page_refs.push(Object::Reference(page_id));
    }

    let count = page_refs.len() as i64;
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_refs,
            "Count" => count,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    merged.trailer.set("Root", Object::Reference(catalog_id));

    debug!(pages = count, "built group report");
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template;

    fn entry(name: &str, office: &str) -> SummaryEntry {
        SummaryEntry { name: name.into(), office: office.into() }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
    }

    #[test]
    fn offices_are_grouped_and_sorted() {
        let groups = group_by_office(&[
            entry("Zeller Anna", "Unia"),
            entry("Berger Paul", "Unia"),
            entry("Roth Eva", " "),
            entry("Keller Max", "-"),
            entry("Meier Lea", "Syna"),
        ]);
        let offices: Vec<&str> = groups.keys().map(String::as_str).collect();
        assert_eq!(offices, vec![UNDEFINED_OFFICE, "Syna", "Unia"]);
        assert_eq!(groups["Unia"], vec!["Berger Paul", "Zeller Anna"]);
        assert_eq!(groups[UNDEFINED_OFFICE], vec!["Keller Max", "Roth Eva"]);
    }

    #[test]
    fn long_summaries_continue_on_new_pages() {
        let entries: Vec<SummaryEntry> = (0..80).map(|i| entry(&format!("Person {i:02}"), "Unia")).collect();
        assert_eq!(summary_operations(&entries[..5], date()).len(), 1);
        assert!(summary_operations(&entries, date()).len() >= 2);
    }

    #[test]
    fn merged_report_has_every_page_plus_summary() {
        let forms: Vec<Document> = (0..3)
            .map(|_| Document::load_mem(&template::blank_form().unwrap()).unwrap())
            .collect();
        let entries = vec![entry("Dupont Jean", "Unia")];

        let mut report = build_report(forms, &entries, date()).unwrap();
        assert_eq!(report.get_pages().len(), 3 * 2 + 1);

        let mut bytes = Vec::new();
        report.save_to(&mut bytes).unwrap();
        let reloaded = Document::load_mem(&bytes).unwrap();
        let pages = reloaded.get_pages();
        assert_eq!(pages.len(), 7);
        for page in pages.values() {
            let dict = reloaded.get_object(*page).unwrap().as_dict().unwrap();
            assert!(dict.has(b"MediaBox"));
        }
        let last = *pages.values().last().unwrap();
        let content = reloaded.get_page_content(last).unwrap();
        assert!(content.windows(11).any(|w| w == b"Dupont Jean"));
    }
}
