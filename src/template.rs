// Blank MMT form: a two-page AcroForm carrying every field of the layout
// table, used when a participant has no uploaded original.

use std::collections::BTreeMap;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::error::GenerateError;
use crate::form::{self, AcroForm};
use crate::layout::{self, ScalarField, INTERRUPTION_NO, INTERRUPTION_YES, PRESENCE_TYPE_OPTION, SCALAR_FIELDS};

// ============================================================================
// Constants
// ============================================================================

/// A4 dimensions in points
pub(crate) const PAGE_WIDTH_PT: f32 = 595.28;
pub(crate) const PAGE_HEIGHT_PT: f32 = 841.89;

const MARGIN_PT: f32 = 42.0;

/// Font sizes in points
const TITLE_FONT_SIZE: f32 = 16.0;
const LABEL_FONT_SIZE: f32 = 9.0;

/// Text field geometry
const FIELD_X_PT: f32 = 210.0;
const FIELD_WIDTH_PT: f32 = 300.0;
const FIELD_HEIGHT_PT: f32 = 16.0;
const ROW_SPACING_PT: f32 = 24.0;

/// Attendance grid geometry
const GRID_ROW_HEIGHT_PT: f32 = 18.0;
const GRID_CELL_WIDTH_PT: f32 = 40.0;
const GRID_AM_X_PT: f32 = 110.0;
const GRID_PM_X_PT: f32 = 160.0;

const BOX_SIZE_PT: f32 = 12.0;

const FF_RADIO_NO_TOGGLE: i64 = (1 << 15) | (1 << 14);
const FF_PUSH_BUTTON: i64 = 1 << 16;
const ANNOT_PRINT: i64 = 4;

fn page_one_label(key: ScalarField, field_id: &str) -> Option<&'static str> {
    Some(match key {
        ScalarField::LastName => "Nom",
        ScalarField::FirstName => "Prénom",
        ScalarField::AvsNumber if field_id == "Textfeld 43" => "N° AVS (ancien format)",
        ScalarField::AvsNumber => "N° AVS",
        ScalarField::BirthDate => "Date de naissance",
        ScalarField::CourseType => "Titre de la MMT",
        ScalarField::DateStart => "Début de la mesure",
        ScalarField::DateEnd => "Fin de la mesure",
        ScalarField::WorkPercent => "Taux d'occupation",
        ScalarField::DecisionNumber => "N° de décision",
        ScalarField::UnemploymentOffice => "Caisse de chômage",
        ScalarField::ExecutionPlace => "Lieu d'exécution",
        ScalarField::OrganizerName => "Organisateur MMT",
        ScalarField::OrganizerLastName => "Nom de l'organisateur",
        ScalarField::OrganizerFirstName => "Prénom de l'organisateur",
        ScalarField::OrganizerPhone => "Téléphone",
        ScalarField::OrganizerEmail => "E-mail",
        ScalarField::InterruptionDate => "Date d'interruption",
        _ => return None,
    })
}

// ============================================================================
// Public API
// ============================================================================

/// Serialized blank form.
pub fn blank_form() -> Result<Vec<u8>, GenerateError> {
    blank_form_with(&[])
}

/// Blank form with some text fields already filled, keyed by field id.
pub fn blank_form_with(values: &[(&str, &str)]) -> Result<Vec<u8>, GenerateError> {
    let mut doc = build_document()?;
    if !values.is_empty() {
        let form = AcroForm::open(&doc).map_err(|e| GenerateError::Template(e.to_string()))?;
        for (field, value) in values {
            form.set_text(&mut doc, field, value)
                .map_err(|e| GenerateError::Template(format!("{field}: {e}")))?;
        }
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| GenerateError::Serialize(e.to_string()))?;
    Ok(bytes)
}

// ============================================================================
// Document construction
// ============================================================================

struct PageDraft {
    id: ObjectId,
    operations: Vec<Operation>,
    annots: Vec<Object>,
}

struct FormBuilder {
    doc: Document,
    font_id: ObjectId,
    pages: Vec<PageDraft>,
    root_fields: Vec<Object>,
    parents: BTreeMap<String, (ObjectId, Vec<Object>)>,
}

fn build_document() -> Result<Document, GenerateError> {
    let mut doc = Document::with_version("1.5");
    let font_id = doc.add_object(form::helvetica());
    let pages = (0..2)
        .map(|_| PageDraft { id: doc.new_object_id(), operations: Vec::new(), annots: Vec::new() })
        .collect();

    let mut builder = FormBuilder {
        doc,
        font_id,
        pages,
        root_fields: Vec::new(),
        parents: BTreeMap::new(),
    };

    draw_participant_page(&mut builder);
    draw_attendance_page(&mut builder);
    builder.finish()
}

fn draw_participant_page(b: &mut FormBuilder) {
    let mut y = PAGE_HEIGHT_PT - MARGIN_PT - TITLE_FONT_SIZE;
    b.label(0, "Attestation de participation à une MMT", MARGIN_PT, y, TITLE_FONT_SIZE);
    y -= 2.0 * ROW_SPACING_PT;

    for (key, field_id) in SCALAR_FIELDS {
        let Some(label) = page_one_label(*key, field_id) else { continue };
        b.label(0, label, MARGIN_PT, y + 4.0, LABEL_FONT_SIZE);
        b.text_field(0, field_id, rect(FIELD_X_PT, y, FIELD_WIDTH_PT, FIELD_HEIGHT_PT), 0);
        y -= ROW_SPACING_PT;
    }

    y -= ROW_SPACING_PT / 2.0;
    if let Some(id) = layout::resolve(ScalarField::NoParticipation) {
        b.label(0, "Pas de participation", MARGIN_PT, y + 2.0, LABEL_FONT_SIZE);
        b.checkbox(0, id, rect(FIELD_X_PT, y, BOX_SIZE_PT, BOX_SIZE_PT));
        y -= ROW_SPACING_PT;
    }
    if let Some(id) = layout::resolve(ScalarField::Correction) {
        b.label(0, "Correction", MARGIN_PT, y + 2.0, LABEL_FONT_SIZE);
        b.checkbox(0, id, rect(FIELD_X_PT, y, BOX_SIZE_PT, BOX_SIZE_PT));
        y -= ROW_SPACING_PT;
    }
    if let Some(id) = layout::resolve(ScalarField::PresenceType) {
        b.label(0, "Type de présence", MARGIN_PT, y + 2.0, LABEL_FONT_SIZE);
        b.label(0, "Mensuel", FIELD_X_PT + BOX_SIZE_PT + 4.0, y + 2.0, LABEL_FONT_SIZE);
        b.label(0, "Autre", FIELD_X_PT + 104.0 + BOX_SIZE_PT, y + 2.0, LABEL_FONT_SIZE);
        b.radio_group(
            0,
            id,
            &[
                (PRESENCE_TYPE_OPTION, rect(FIELD_X_PT, y, BOX_SIZE_PT, BOX_SIZE_PT)),
                ("Auswahl2", rect(FIELD_X_PT + 100.0, y, BOX_SIZE_PT, BOX_SIZE_PT)),
            ],
        );
        y -= ROW_SPACING_PT;
    }
    if let Some(id) = layout::resolve(ScalarField::Interruption) {
        b.label(0, "Interruption de la MMT", MARGIN_PT, y + 2.0, LABEL_FONT_SIZE);
        b.label(0, "Non", FIELD_X_PT + BOX_SIZE_PT + 4.0, y + 2.0, LABEL_FONT_SIZE);
        b.label(0, "Oui", FIELD_X_PT + 104.0 + BOX_SIZE_PT, y + 2.0, LABEL_FONT_SIZE);
        b.radio_group(
            0,
            id,
            &[
                (INTERRUPTION_NO, rect(FIELD_X_PT, y, BOX_SIZE_PT, BOX_SIZE_PT)),
                (INTERRUPTION_YES, rect(FIELD_X_PT + 100.0, y, BOX_SIZE_PT, BOX_SIZE_PT)),
            ],
        );
    }
}

fn draw_attendance_page(b: &mut FormBuilder) {
    let mut y = PAGE_HEIGHT_PT - MARGIN_PT - TITLE_FONT_SIZE;
    b.label(1, "Contrôle des présences", MARGIN_PT, y, TITLE_FONT_SIZE);
    if let Some(id) = layout::resolve(ScalarField::MonthYear) {
        b.label(1, "Mois / année", 330.0, y, LABEL_FONT_SIZE);
        b.text_field(1, id, rect(400.0, y - 4.0, 100.0, FIELD_HEIGHT_PT), 0);
    }
    y -= 2.0 * ROW_SPACING_PT;

    b.label(1, "Jour", MARGIN_PT, y + 4.0, LABEL_FONT_SIZE);
    b.label(1, "Matin", GRID_AM_X_PT + 6.0, y + 4.0, LABEL_FONT_SIZE);
    b.label(1, "Après-midi", GRID_PM_X_PT, y + 4.0, LABEL_FONT_SIZE);
    y -= GRID_ROW_HEIGHT_PT;

    for day in 1..=layout::DAYS_ON_FORM {
        let Some((am, pm)) = layout::attendance_fields_for_day(day, layout::DAYS_ON_FORM) else { continue };
        b.label(1, &format!("{day}"), MARGIN_PT + 4.0, y + 4.0, LABEL_FONT_SIZE);
        b.text_field(1, am, rect(GRID_AM_X_PT, y, GRID_CELL_WIDTH_PT, GRID_ROW_HEIGHT_PT - 2.0), 1);
        b.text_field(1, pm, rect(GRID_PM_X_PT, y, GRID_CELL_WIDTH_PT, GRID_ROW_HEIGHT_PT - 2.0), 1);
        y -= GRID_ROW_HEIGHT_PT;
    }

    y -= GRID_ROW_HEIGHT_PT / 2.0;
    if let Some(id) = layout::resolve(ScalarField::Comments) {
        b.label(1, "Justifications", MARGIN_PT, y + 4.0, LABEL_FONT_SIZE);
        b.text_field(1, id, rect(GRID_AM_X_PT, y, 400.0, FIELD_HEIGHT_PT), 0);
        y -= ROW_SPACING_PT;
    }
    if let Some(id) = layout::resolve(ScalarField::SignaturePlace) {
        b.label(1, "Lieu", MARGIN_PT, y + 4.0, LABEL_FONT_SIZE);
        b.text_field(1, id, rect(GRID_AM_X_PT, y, 150.0, FIELD_HEIGHT_PT), 0);
    }
    if let Some(id) = layout::resolve(ScalarField::SignatureDate) {
        b.label(1, "Date", 300.0, y + 4.0, LABEL_FONT_SIZE);
        b.text_field(1, id, rect(340.0, y, 120.0, FIELD_HEIGHT_PT), 0);
    }
    y -= ROW_SPACING_PT + 50.0;
    if let Some(id) = layout::resolve(ScalarField::Signature) {
        b.label(1, "Signature", MARGIN_PT, y + 20.0, LABEL_FONT_SIZE);
        b.push_button(1, id, rect(GRID_AM_X_PT, y, 200.0, 50.0));
    }
}

fn rect(x: f32, y: f32, width: f32, height: f32) -> [f32; 4] {
    [x, y, x + width, y + height]
}

fn rect_object(r: [f32; 4]) -> Object {
    Object::Array(r.iter().map(|v| Object::Real(*v)).collect())
}

impl FormBuilder {
    fn label(&mut self, page: usize, text: &str, x: f32, y: f32, size: f32) {
        self.pages[page].operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), Object::Real(size)]),
            Operation::new("Td", vec![Object::Real(x), Object::Real(y)]),
            Operation::new("Tj", vec![Object::String(form::win_ansi(text), StringFormat::Literal)]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn frame(&mut self, page: usize, r: [f32; 4]) {
        self.pages[page].operations.extend([
            Operation::new("w", vec![Object::Real(0.5)]),
            Operation::new(
                "re",
                vec![Object::Real(r[0]), Object::Real(r[1]), Object::Real(r[2] - r[0]), Object::Real(r[3] - r[1])],
            ),
            Operation::new("S", vec![]),
        ]);
    }

    /// Register a terminal field dictionary, splitting a dotted name into a
    /// parent field and a kid so `1.2` is stored the way form designers do.
    fn add_field(&mut self, name: &str, mut dict: Dictionary) -> ObjectId {
        let id = self.doc.new_object_id();
        match name.split_once('.') {
            Some((parent, partial)) => {
                let parent_id = self.parent_id(parent);
                dict.set("T", form::encode_text_string(partial));
                dict.set("Parent", Object::Reference(parent_id));
                if let Some((_, kids)) = self.parents.get_mut(parent) {
                    kids.push(Object::Reference(id));
                }
            }
            None => {
                dict.set("T", form::encode_text_string(name));
                self.root_fields.push(Object::Reference(id));
            }
        }
        self.doc.objects.insert(id, Object::Dictionary(dict));
        id
    }

    fn parent_id(&mut self, name: &str) -> ObjectId {
        if let Some((id, _)) = self.parents.get(name) {
            return *id;
        }
        let id = self.doc.new_object_id();
        self.parents.insert(name.to_string(), (id, Vec::new()));
        self.root_fields.push(Object::Reference(id));
        id
    }

    fn widget(&self, page: usize, r: [f32; 4]) -> Dictionary {
        dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "Rect" => rect_object(r),
            "P" => Object::Reference(self.pages[page].id),
            "F" => ANNOT_PRINT,
        }
    }

    fn text_field(&mut self, page: usize, name: &str, r: [f32; 4], quadding: i64) {
        let mut dict = self.widget(page, r);
        dict.set("FT", "Tx");
        dict.set("DA", Object::string_literal(form::default_appearance(form::DEFAULT_FONT_SIZE)));
        dict.set("Q", quadding);
        let id = self.add_field(name, dict);
        self.pages[page].annots.push(Object::Reference(id));
        self.frame(page, r);
    }

    fn checkbox(&mut self, page: usize, name: &str, r: [f32; 4]) {
        let (on, off) = self.state_appearances(r);
        let mut dict = self.widget(page, r);
        dict.set("FT", "Btn");
        dict.set("V", "Off");
        dict.set("AS", "Off");
        dict.set("AP", dictionary! { "N" => dictionary! { "Yes" => on, "Off" => off } });
        let id = self.add_field(name, dict);
        self.pages[page].annots.push(Object::Reference(id));
        self.frame(page, r);
    }

    fn radio_group(&mut self, page: usize, name: &str, options: &[(&str, [f32; 4])]) {
        let field = dictionary! {
            "FT" => "Btn",
            "Ff" => FF_RADIO_NO_TOGGLE,
            "V" => "Off",
        };
        let field_id = self.add_field(name, field);

        let mut kids = Vec::new();
        for (option, r) in options {
            let (on, off) = self.state_appearances(*r);
            let mut widget = self.widget(page, *r);
            widget.set("Parent", Object::Reference(field_id));
            widget.set("AS", "Off");
            let mut states = Dictionary::new();
            states.set(*option, on);
            states.set("Off", off);
            widget.set("AP", dictionary! { "N" => states });
            let widget_id = self.doc.add_object(widget);
            kids.push(Object::Reference(widget_id));
            self.pages[page].annots.push(Object::Reference(widget_id));
            self.frame(page, *r);
        }

        if let Ok(Object::Dictionary(dict)) = self.doc.get_object_mut(field_id) {
            dict.set("Kids", kids);
        }
    }

    fn push_button(&mut self, page: usize, name: &str, r: [f32; 4]) {
        let mut dict = self.widget(page, r);
        dict.set("FT", "Btn");
        dict.set("Ff", FF_PUSH_BUTTON);
        let id = self.add_field(name, dict);
        self.pages[page].annots.push(Object::Reference(id));
        self.frame(page, r);
    }

    /// "On" (a cross) and "Off" (nothing) appearance streams for a box.
    fn state_appearances(&mut self, r: [f32; 4]) -> (Object, Object) {
        let (w, h) = (r[2] - r[0], r[3] - r[1]);
        let bbox = vec![0.into(), 0.into(), Object::Real(w), Object::Real(h)];
        let cross = format!("q 0 g 1 w 2 2 m {0} {1} l S 2 {1} m {0} 2 l S Q", w - 2.0, h - 2.0);
        let on = self.doc.add_object(Stream::new(
            dictionary! { "Type" => "XObject", "Subtype" => "Form", "BBox" => bbox.clone() },
            cross.into_bytes(),
        ));
        let off = self.doc.add_object(Stream::new(
            dictionary! { "Type" => "XObject", "Subtype" => "Form", "BBox" => bbox },
            Vec::new(),
        ));
        (Object::Reference(on), Object::Reference(off))
    }

    fn finish(mut self) -> Result<Document, GenerateError> {
        for (name, (id, kids)) in std::mem::take(&mut self.parents) {
            let parent = dictionary! {
                "T" => form::encode_text_string(&name),
                "Kids" => kids,
            };
            self.doc.objects.insert(id, Object::Dictionary(parent));
        }

        let pages_id = self.doc.new_object_id();
        let mut page_refs = Vec::new();
        for draft in std::mem::take(&mut self.pages) {
            let content = Content { operations: draft.operations }
                .encode()
                .map_err(|e| GenerateError::Template(e.to_string()))?;
            let content_id = self.doc.add_object(Stream::new(Dictionary::new(), content));
            let page = dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "Contents" => Object::Reference(content_id),
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => Object::Reference(self.font_id) },
                },
                "Annots" => draft.annots,
            };
            self.doc.objects.insert(draft.id, Object::Dictionary(page));
            page_refs.push(Object::Reference(draft.id));
        }

        let count = page_refs.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => page_refs,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(PAGE_WIDTH_PT), Object::Real(PAGE_HEIGHT_PT)],
        };
        self.doc.objects.insert(pages_id, Object::Dictionary(pages));

        let mut fonts = Dictionary::new();
        fonts.set(form::FONT_RESOURCE, Object::Reference(self.font_id));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
            "AcroForm" => dictionary! {
                "Fields" => std::mem::take(&mut self.root_fields),
                "DR" => dictionary! { "Font" => fonts },
                "DA" => Object::string_literal(form::default_appearance(form::DEFAULT_FONT_SIZE)),
                "NeedAppearances" => true,
            },
        });
        self.doc.trailer.set("Root", Object::Reference(catalog_id));
        Ok(self.doc)
    }
}
