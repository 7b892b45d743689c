// Participants and classes as stored in the database document.

use std::collections::BTreeMap;

use base64::Engine;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extractor::ParsedFormData;

/// Weekly half-day schedule keys, `"{weekday}-am"` / `"{weekday}-pm"` for
/// Monday (1) to Friday (5).
pub fn default_schedule() -> BTreeMap<String, bool> {
    (1..=5)
        .flat_map(|day| [format!("{day}-am"), format!("{day}-pm")])
        .map(|key| (key, true))
        .collect()
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_work_percent() -> u32 {
    100
}

/// Someone following an MMT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Participant {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub course_type: String,
    pub date_start: String,
    pub date_end: String,
    #[serde(default = "default_work_percent")]
    pub work_percent: u32,
    pub avs_number: String,
    pub birth_date: String,
    pub unemployment_office: String,
    #[serde(rename = "interruptionMMT")]
    pub interruption_mmt: bool,
    pub interruption_date: Option<String>,
    pub schedule: BTreeMap<String, bool>,
    /// Uploaded form, base64 encoded, reused as the export template.
    pub original_pdf: Option<String>,
    /// Set when the participant is moved out of the active list.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,
}

impl Default for Participant {
    fn default() -> Self {
        Self {
            id: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            course_type: String::new(),
            date_start: String::new(),
            date_end: String::new(),
            work_percent: default_work_percent(),
            avs_number: String::new(),
            birth_date: String::new(),
            unemployment_office: String::new(),
            interruption_mmt: false,
            interruption_date: None,
            schedule: default_schedule(),
            original_pdf: None,
            archived: false,
        }
    }
}

impl Participant {
    pub fn from_parsed(parsed: &ParsedFormData) -> Self {
        let mut participant = Participant::default();
        participant.apply_parsed(parsed);
        participant
    }

    /// Overwrite form-derived attributes, keeping id, schedule and template.
    pub fn apply_parsed(&mut self, parsed: &ParsedFormData) {
        self.first_name = parsed.first_name.clone();
        self.last_name = parsed.last_name.clone();
        self.course_type = parsed.course_type.clone();
        self.date_start = parsed.date_start.clone();
        self.date_end = parsed.date_end.clone();
        self.work_percent = parsed.work_percent;
        self.avs_number = parsed.avs_number.clone();
        self.birth_date = parsed.birth_date.clone();
        self.unemployment_office = parsed.unemployment_office.clone();
        self.interruption_mmt = parsed.was_interrupted;
        if !parsed.interruption_date.is_empty() {
            self.interruption_date = Some(parsed.interruption_date.clone());
        }
    }

    /// Case-insensitive identity match used to deduplicate imports. Two
    /// empty first names count as equal.
    pub fn same_person(&self, first_name: &str, last_name: &str) -> bool {
        self.last_name.to_lowercase() == last_name.to_lowercase()
            && self.first_name.to_lowercase() == first_name.to_lowercase()
    }

    pub fn full_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (true, _) => self.last_name.clone(),
            (false, true) => self.first_name.clone(),
            (false, false) => format!("{} {}", self.first_name, self.last_name),
        }
    }

    pub fn set_original_pdf(&mut self, bytes: &[u8]) {
        self.original_pdf = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
    }

    /// Decoded original form; `None` when absent, empty or not valid base64.
    pub fn original_pdf_bytes(&self) -> Option<Vec<u8>> {
        let encoded = self.original_pdf.as_deref()?;
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
        (!bytes.is_empty()).then_some(bytes)
    }

    /// Whether the measure ended before `threshold` (exclusive).
    pub fn ended_before(&self, threshold: NaiveDate) -> bool {
        NaiveDate::parse_from_str(&self.date_end, "%Y-%m-%d")
            .map(|end| end < threshold)
            .unwrap_or(false)
    }
}

/// A group of participants whose attendance is entered together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Class {
    pub id: String,
    pub name: String,
    pub description: String,
    pub participant_ids: Vec<String>,
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: new_id(), name: name.into(), ..Default::default() }
    }

    pub fn has_participant(&self, participant_id: &str) -> bool {
        self.participant_ids.iter().any(|id| id == participant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_full_week() {
        let participant = Participant::default();
        assert_eq!(participant.work_percent, 100);
        assert_eq!(participant.schedule.len(), 10);
        assert_eq!(participant.schedule.get("5-pm"), Some(&true));
    }

    #[test]
    fn identity_match_ignores_case() {
        let participant = Participant {
            first_name: "Jean".into(),
            last_name: "Dupont".into(),
            ..Default::default()
        };
        assert!(participant.same_person("JEAN", "dupont"));
        assert!(!participant.same_person("", "Dupont"));

        let no_first = Participant { last_name: "Muller".into(), ..Default::default() };
        assert!(no_first.same_person("", "MULLER"));
    }

    #[test]
    fn original_pdf_round_trips_as_base64() {
        let mut participant = Participant::default();
        assert_eq!(participant.original_pdf_bytes(), None);
        participant.set_original_pdf(b"%PDF-1.5");
        assert_eq!(participant.original_pdf_bytes(), Some(b"%PDF-1.5".to_vec()));
    }

    #[test]
    fn json_uses_stored_field_names() {
        let json = r#"{"id":"p1","firstName":"Jean","lastName":"Dupont","interruptionMMT":true}"#;
        let participant: Participant = serde_json::from_str(json).unwrap();
        assert!(participant.interruption_mmt);
        assert_eq!(participant.work_percent, 100);

        let back = serde_json::to_value(&participant).unwrap();
        assert_eq!(back["lastName"], "Dupont");
        assert_eq!(back["interruptionMMT"], true);
    }

    #[test]
    fn ended_before_threshold() {
        let participant = Participant { date_end: "2025-05-31".into(), ..Default::default() };
        let june = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let may = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        assert!(participant.ended_before(june));
        assert!(!participant.ended_before(may));
        assert!(!Participant::default().ended_before(june));
    }
}
