//! Reads an uploaded MMT form back into structured participant data.
//!
//! Every field of the form is decoded, the ones the layout table knows are
//! copied onto [`ParsedFormData`], dates and the work percentage are
//! normalized, and the file name is used as a fallback source of identity
//! when the name fields are blank.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use lopdf::Document;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dates::{days_in_month, normalize_date};
use crate::error::{ParseError, Warning};
use crate::form::{AcroForm, FieldValue};
use crate::layout::{self, ScalarField, INTERRUPTION_YES, SCALAR_FIELDS};

lazy_static! {
    static ref DIGITS: Regex = Regex::new(r"([0-9]+)").unwrap();
    static ref YEAR_MONTH: Regex = Regex::new(r"^([0-9]{4})([0-9]{2})").unwrap();
}

const AFFIRMATIVE_OPTIONS: [&str; 6] = ["yes", "oui", "on", "1", "selection2", "auswahl2"];

/// Codes found in one day's morning and afternoon cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCodes {
    pub am: String,
    pub pm: String,
}

/// Best-effort content of an MMT form. Absent values are empty strings;
/// only `last_name` is guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFormData {
    pub first_name: String,
    pub last_name: String,
    pub course_type: String,
    pub date_start: String,
    pub date_end: String,
    pub work_percent: u32,
    pub avs_number: String,
    pub birth_date: String,
    pub month_year: String,
    pub decision_number: String,
    pub unemployment_office: String,
    pub execution_place: String,
    pub organizer_name: String,
    pub organizer_last_name: String,
    pub organizer_first_name: String,
    pub organizer_phone: String,
    pub organizer_email: String,
    pub interruption_date: String,
    pub signature_place: String,
    pub signature_date: String,
    pub comments: String,
    pub no_participation: bool,
    pub is_correction: bool,
    pub was_interrupted: bool,
    pub attendance_by_day: BTreeMap<u32, DayCodes>,
    #[serde(skip)]
    pub warnings: Vec<Warning>,
}

impl Default for ParsedFormData {
    fn default() -> Self {
        Self {
            first_name: String::new(),
            last_name: String::new(),
            course_type: String::new(),
            date_start: String::new(),
            date_end: String::new(),
            work_percent: 100,
            avs_number: String::new(),
            birth_date: String::new(),
            month_year: String::new(),
            decision_number: String::new(),
            unemployment_office: String::new(),
            execution_place: String::new(),
            organizer_name: String::new(),
            organizer_last_name: String::new(),
            organizer_first_name: String::new(),
            organizer_phone: String::new(),
            organizer_email: String::new(),
            interruption_date: String::new(),
            signature_place: String::new(),
            signature_date: String::new(),
            comments: String::new(),
            no_participation: false,
            is_correction: false,
            was_interrupted: false,
            attendance_by_day: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }
}

impl ParsedFormData {
    fn text_slot(&mut self, key: ScalarField) -> Option<&mut String> {
        Some(match key {
            ScalarField::LastName => &mut self.last_name,
            ScalarField::FirstName => &mut self.first_name,
            ScalarField::AvsNumber => &mut self.avs_number,
            ScalarField::BirthDate => &mut self.birth_date,
            ScalarField::MonthYear => &mut self.month_year,
            ScalarField::CourseType => &mut self.course_type,
            ScalarField::DateStart => &mut self.date_start,
            ScalarField::DateEnd => &mut self.date_end,
            ScalarField::DecisionNumber => &mut self.decision_number,
            ScalarField::UnemploymentOffice => &mut self.unemployment_office,
            ScalarField::ExecutionPlace => &mut self.execution_place,
            ScalarField::OrganizerName => &mut self.organizer_name,
            ScalarField::OrganizerLastName => &mut self.organizer_last_name,
            ScalarField::OrganizerFirstName => &mut self.organizer_first_name,
            ScalarField::OrganizerPhone => &mut self.organizer_phone,
            ScalarField::OrganizerEmail => &mut self.organizer_email,
            ScalarField::InterruptionDate => &mut self.interruption_date,
            ScalarField::SignaturePlace => &mut self.signature_place,
            ScalarField::SignatureDate => &mut self.signature_date,
            ScalarField::Comments => &mut self.comments,
            ScalarField::WorkPercent
            | ScalarField::NoParticipation
            | ScalarField::Correction
            | ScalarField::Interruption
            | ScalarField::Signature
            | ScalarField::PresenceType => return None,
        })
    }

    fn apply(&mut self, key: ScalarField, value: &FieldValue) {
        match key {
            ScalarField::WorkPercent => self.work_percent = parse_work_percent(&value.as_text()),
            ScalarField::NoParticipation => self.no_participation = is_affirmative(value),
            ScalarField::Correction => self.is_correction = is_affirmative(value),
            ScalarField::Interruption => {
                self.was_interrupted = matches!(value, FieldValue::Selected(s) if s == INTERRUPTION_YES)
                    || matches!(value, FieldValue::Checked(true))
            }
            ScalarField::Signature | ScalarField::PresenceType => {}
            _ => {
                if let Some(slot) = self.text_slot(key) {
                    *slot = value.as_text().trim().to_string();
                }
            }
        }
    }
}

fn is_affirmative(value: &FieldValue) -> bool {
    match value {
        FieldValue::Checked(checked) => *checked,
        FieldValue::Selected(option) | FieldValue::Text(option) => {
            AFFIRMATIVE_OPTIONS.contains(&option.trim().to_lowercase().as_str())
        }
        FieldValue::Empty => false,
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse an MMT form. `file_name` feeds the identity fallback and error
/// messages; only its final path component is used.
pub fn parse(pdf_bytes: &[u8], file_name: &str) -> Result<ParsedFormData, ParseError> {
    let display_name = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());

    let doc = Document::load_mem(pdf_bytes).map_err(|e| ParseError::Extraction {
        file_name: display_name.clone(),
        reason: e.to_string(),
    })?;
    let form = AcroForm::open(&doc).map_err(|e| ParseError::Extraction {
        file_name: display_name.clone(),
        reason: e.to_string(),
    })?;

    let mut result = ParsedFormData::default();
    let values = read_values(&doc, &form, &mut result.warnings);
    debug!(file = %display_name, fields = form.fields().len(), filled = values.len(), "decoded form fields");

    // The primary identifier is listed first; an alternate only fills a gap.
    let mut filled: Vec<ScalarField> = Vec::new();
    for (key, field_id) in SCALAR_FIELDS {
        if filled.contains(key) {
            continue;
        }
        if let Some(value) = values.get(*field_id) {
            result.apply(*key, value);
            filled.push(*key);
        }
    }

    result.date_start = normalize_date(&result.date_start);
    result.date_end = normalize_date(&result.date_end);
    result.birth_date = normalize_date(&result.birth_date);
    result.interruption_date = normalize_date(&result.interruption_date);

    for day in 1..=layout::DAYS_ON_FORM {
        let Some((am_id, pm_id)) = layout::attendance_fields_for_day(day, layout::DAYS_ON_FORM) else {
            continue;
        };
        let am = values.get(am_id).map(FieldValue::as_text).unwrap_or_default();
        let pm = values.get(pm_id).map(FieldValue::as_text).unwrap_or_default();
        if !am.is_empty() || !pm.is_empty() {
            result.attendance_by_day.insert(day, DayCodes { am, pm });
        }
    }

    if result.first_name.is_empty() || result.last_name.is_empty() {
        info!(file = %display_name, "name fields blank, falling back to file name");
        let fallback = identity_from_filename(&display_name);
        fill_if_empty(&mut result.first_name, fallback.first_name);
        fill_if_empty(&mut result.last_name, fallback.last_name);
        fill_if_empty(&mut result.course_type, fallback.course_type);
        fill_if_empty(&mut result.date_start, fallback.date_start);
        fill_if_empty(&mut result.date_end, fallback.date_end);
    }

    if result.last_name.is_empty() {
        return Err(ParseError::MissingIdentity { file_name: display_name });
    }

    Ok(result)
}

/// Non-empty decoded values of every field, keyed by field name. Fields
/// that fail to decode are recorded as warnings and skipped.
fn read_values(doc: &Document, form: &AcroForm, warnings: &mut Vec<Warning>) -> BTreeMap<String, FieldValue> {
    let mut values = BTreeMap::new();
    for field in form.fields() {
        match form.value(doc, field) {
            Ok(value) if !value.is_empty() => {
                if layout::key_of(&field.name).is_none() && layout::grid_position(&field.name).is_none() {
                    debug!(field = %field.name, "ignoring unmapped field");
                }
                values.insert(field.name.clone(), value);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(field = %field.name, error = %e, "could not read field");
                warnings.push(Warning::FieldRead { field: field.name.clone(), reason: e.to_string() });
            }
        }
    }
    values
}

fn fill_if_empty(slot: &mut String, value: String) {
    if slot.is_empty() {
        *slot = value;
    }
}

/// First run of digits as a percentage; 100 when there is none.
pub fn parse_work_percent(raw: &str) -> u32 {
    DIGITS
        .captures(raw)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(100)
}

// ============================================================================
// File name fallback
// ============================================================================

/// Identity recovered from an export file name such as
/// `FORM_MARKET0625_DupontJean_202506.pdf`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilenameIdentity {
    pub first_name: String,
    pub last_name: String,
    pub course_type: String,
    pub date_start: String,
    pub date_end: String,
}

pub fn identity_from_filename(file_name: &str) -> FilenameIdentity {
    let mut identity = FilenameIdentity::default();
    let stem = file_name.replacen(".pdf", "", 1);
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 {
        return identity;
    }

    identity.course_type = parts[1].to_string();

    let (first, last) = split_full_name(parts[2]);
    identity.first_name = first;
    identity.last_name = last;

    if let Some(caps) = YEAR_MONTH.captures(parts[3]) {
        let year: i32 = caps[1].parse().unwrap_or(0);
        let month: u32 = caps[2].parse().unwrap_or(0);
        if NaiveDate::from_ymd_opt(year, month, 1).is_some() {
            identity.date_start = format!("{year:04}-{month:02}-01");
            identity.date_end = format!("{year:04}-{month:02}-{:02}", days_in_month(year, month));
        }
    }

    identity
}

/// Split a concatenated `LastnameFirstname` at its last capital letter.
///
/// With fewer than two capitals the whole string is the last name. Compound
/// surnames split wrongly (`DeLaCruzAna` gives `DeLaCruz` / `Ana`, but
/// `DeLaCruz` alone gives `DeLa` / `Cruz`); callers rely on this exact split.
pub fn split_full_name(full_name: &str) -> (String, String) {
    let capitals: Vec<usize> = full_name
        .char_indices()
        .filter(|(_, c)| is_capital(*c))
        .map(|(idx, _)| idx)
        .collect();

    if capitals.len() >= 2 {
        let split = capitals[capitals.len() - 1];
        let (last, first) = full_name.split_at(split);
        return (first.to_string(), last.to_string());
    }
    (String::new(), full_name.to_string())
}

fn is_capital(c: char) -> bool {
    c.is_uppercase() && (c.is_ascii_uppercase() || ('\u{C0}'..='\u{178}').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_percent_takes_first_digits() {
        assert_eq!(parse_work_percent("80%"), 80);
        assert_eq!(parse_work_percent("taux 50 / 100"), 50);
        assert_eq!(parse_work_percent(""), 100);
        assert_eq!(parse_work_percent("full time"), 100);
        assert_eq!(parse_work_percent("٨٠%"), 100);
    }

    #[test]
    fn name_split_at_last_capital() {
        assert_eq!(split_full_name("DupontJean"), ("Jean".into(), "Dupont".into()));
        assert_eq!(split_full_name("ÉmileZola"), ("Zola".into(), "Émile".into()));
        assert_eq!(split_full_name("dupont"), ("".into(), "dupont".into()));
        assert_eq!(split_full_name("Dupont"), ("".into(), "Dupont".into()));
        assert_eq!(split_full_name("DeLaCruz"), ("Cruz".into(), "DeLa".into()));
    }

    #[test]
    fn filename_identity_from_export_name() {
        let identity = identity_from_filename("FORM_MARKET0625_DupontJean_202506.pdf");
        assert_eq!(
            identity,
            FilenameIdentity {
                first_name: "Jean".into(),
                last_name: "Dupont".into(),
                course_type: "MARKET0625".into(),
                date_start: "2025-06-01".into(),
                date_end: "2025-06-30".into(),
            }
        );
    }

    #[test]
    fn filename_month_end_follows_calendar() {
        let identity = identity_from_filename("X_C_MullerAnna_20240215.pdf");
        assert_eq!(identity.date_start, "2024-02-01");
        assert_eq!(identity.date_end, "2024-02-29");
    }

    #[test]
    fn short_or_malformed_filenames_yield_nothing() {
        assert_eq!(identity_from_filename("scan.pdf"), FilenameIdentity::default());
        let identity = identity_from_filename("A_B_Dupont_2025xx.pdf");
        assert_eq!(identity.last_name, "Dupont");
        assert_eq!(identity.date_start, "");
        assert_eq!(identity_from_filename("A_B_Dupont_202513.pdf").date_end, "");
    }

    #[test]
    fn affirmative_values() {
        assert!(is_affirmative(&FieldValue::Checked(true)));
        assert!(is_affirmative(&FieldValue::Selected("Oui".into())));
        assert!(!is_affirmative(&FieldValue::Selected("Auswahl1".into())));
    }

    #[test]
    fn primary_avs_field_wins_over_alternate() {
        let bytes = crate::template::blank_form_with(&[
            ("1.2", "Dupont"),
            ("Textfeld 61", "756.1111.2222.33"),
            ("Textfeld 43", "756.9999.8888.77"),
        ])
        .unwrap();
        assert_eq!(parse(&bytes, "a.pdf").unwrap().avs_number, "756.1111.2222.33");

        let bytes = crate::template::blank_form_with(&[("1.2", "Dupont"), ("Textfeld 43", "756.9999.8888.77")]).unwrap();
        assert_eq!(parse(&bytes, "a.pdf").unwrap().avs_number, "756.9999.8888.77");
    }

    #[test]
    fn undecodable_field_becomes_a_warning() {
        let bytes = crate::template::blank_form_with(&[("1.2", "Dupont"), ("1.3", "Jean"), ("1.68", "MARKET0625")]).unwrap();
        let mut doc = Document::load_mem(&bytes).unwrap();
        let first_name = AcroForm::open(&doc).unwrap().field("1.3").unwrap().id;
        doc.get_object_mut(first_name)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("V", lopdf::Object::Array(vec![]));
        let mut broken = Vec::new();
        doc.save_to(&mut broken).unwrap();

        let parsed = parse(&broken, "upload.pdf").unwrap();
        assert_eq!(parsed.last_name, "Dupont");
        assert_eq!(parsed.course_type, "MARKET0625");
        assert_eq!(parsed.first_name, "");
        assert!(matches!(
            parsed.warnings.as_slice(),
            [Warning::FieldRead { field, .. }] if field == "1.3"
        ));
    }

    #[test]
    fn garbage_bytes_are_an_extraction_error() {
        let err = parse(b"not a pdf at all", "/tmp/upload/scan.pdf").unwrap_err();
        assert!(matches!(err, ParseError::Extraction { ref file_name, .. } if file_name == "scan.pdf"));
    }
}
