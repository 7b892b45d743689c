// Attendance codes and the records entered per class and day.

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::dates::TargetMonth;
use crate::error::AttendanceError;

// ============================================================================
// Codes
// ============================================================================

/// Half-day attendance category printed in the form grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceCode {
    X,
    O,
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
}

impl AttendanceCode {
    pub const ALL: [AttendanceCode; 11] = [
        AttendanceCode::X,
        AttendanceCode::O,
        AttendanceCode::A,
        AttendanceCode::B,
        AttendanceCode::C,
        AttendanceCode::D,
        AttendanceCode::E,
        AttendanceCode::F,
        AttendanceCode::G,
        AttendanceCode::H,
        AttendanceCode::I,
    ];

    pub fn letter(self) -> char {
        match self {
            AttendanceCode::X => 'X',
            AttendanceCode::O => 'O',
            AttendanceCode::A => 'A',
            AttendanceCode::B => 'B',
            AttendanceCode::C => 'C',
            AttendanceCode::D => 'D',
            AttendanceCode::E => 'E',
            AttendanceCode::F => 'F',
            AttendanceCode::G => 'G',
            AttendanceCode::H => 'H',
            AttendanceCode::I => 'I',
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AttendanceCode::X => "Sur place",
            AttendanceCode::O => "En ligne",
            AttendanceCode::A => "Vacances",
            AttendanceCode::B => "Maladie/Grossesse",
            AttendanceCode::C => "Accident",
            AttendanceCode::D => "Congé maternité/parental",
            AttendanceCode::E => "Service militaire/civil",
            AttendanceCode::F => "Gain intermédiaire",
            AttendanceCode::G => "Autres absences justifiées",
            AttendanceCode::H => "Jours fériés/Fermeture",
            AttendanceCode::I => "Absence non justifiée",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AttendanceCode::X => "PARTICIPATION SUR PLACE : le participant est présent",
            AttendanceCode::O => "PARTICIPATION EN LIGNE",
            AttendanceCode::A => "VACANCES : jours sans contrôle accordés par l'ORP, selon autorisation écrite",
            AttendanceCode::B => "MALADIE, GROSSESSE : certificat médical requis dès le 4e jour, le temps nécessaire",
            AttendanceCode::C => "ACCIDENT : certificat médical requis dès le 4e jour, le temps nécessaire",
            AttendanceCode::D => "CONGÉ MATERNITÉ, CONGÉ DE L'AUTRE PARENT : selon la durée prévue",
            AttendanceCode::E => "SERVICE MILITAIRE, SERVICE CIVIL, PROTECTION CIVILE : selon la durée prévue",
            AttendanceCode::F => "GAIN INTERMÉDIAIRE : auprès d'un employeur, selon la durée prévue",
            AttendanceCode::G => {
                "AUTRES ABSENCES JUSTIFIÉES AVEC INDEMNITÉ DE CHÔMAGE incluant : Mariage (3j), Naissance (3j), \
                 Décès proche (3j), Funérailles (1j), Déménagement (1j), Inspection militaire (½-1j), Visite médicale, \
                 Assistance proche malade (3j), Entretien ORP, Entretien d'embauche, Rendez-vous officiel, \
                 Essai en entreprise, Autre absence autorisée par l'ORP"
            }
            AttendanceCode::H => {
                "JOURS FÉRIÉS, VACANCES D'ENTREPRISE, FERMETURE DE LA MESURE : selon la durée prévue"
            }
            AttendanceCode::I => {
                "ABSENCES NON JUSTIFIÉES : doit être choisi lorsque le participant s'est absenté sans fournir \
                 d'excuse au préalable"
            }
        }
    }

    /// Only G ("other justified absence") needs an explanation.
    pub fn requires_comment(self) -> bool {
        self == AttendanceCode::G
    }
}

impl fmt::Display for AttendanceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for AttendanceCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        AttendanceCode::ALL
            .into_iter()
            .find(|code| trimmed.len() == 1 && trimmed.eq_ignore_ascii_case(&code.letter().to_string()))
            .ok_or_else(|| s.to_string())
    }
}

/// Serializable view of one code, for the attendance-entry UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeInfo {
    pub code: AttendanceCode,
    pub label: &'static str,
    pub description: &'static str,
    pub requires_comment: bool,
}

pub fn code_table() -> Vec<CodeInfo> {
    AttendanceCode::ALL
        .into_iter()
        .map(|code| CodeInfo {
            code,
            label: code.label(),
            description: code.description(),
            requires_comment: code.requires_comment(),
        })
        .collect()
}

// ============================================================================
// Records
// ============================================================================

/// Morning and afternoon codes of one participant on one date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttendanceRecord {
    pub id: String,
    pub date: String,
    pub participant_id: String,
    pub class_id: String,
    pub morning_code: String,
    pub afternoon_code: String,
    pub comment: String,
}

pub fn record_id(class_id: &str, date: &str, participant_id: &str) -> String {
    format!("{class_id}_{date}_{participant_id}")
}

impl AttendanceRecord {
    pub fn new(
        class_id: &str,
        date: &str,
        participant_id: &str,
        morning: AttendanceCode,
        afternoon: AttendanceCode,
        comment: &str,
    ) -> Self {
        Self {
            id: record_id(class_id, date, participant_id),
            date: date.to_string(),
            participant_id: participant_id.to_string(),
            class_id: class_id.to_string(),
            morning_code: morning.to_string(),
            afternoon_code: afternoon.to_string(),
            comment: comment.to_string(),
        }
    }
}

/// Marker saying attendance for a class and date has been reviewed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttendanceCheck {
    pub id: String,
    pub class_id: String,
    pub date: String,
    pub checked: bool,
    pub checked_at: String,
}

impl AttendanceCheck {
    pub fn now(class_id: &str, date: &str) -> Self {
        Self {
            id: check_id(class_id, date),
            class_id: class_id.to_string(),
            date: date.to_string(),
            checked: true,
            checked_at: Local::now().to_rfc3339(),
        }
    }
}

pub fn check_id(class_id: &str, date: &str) -> String {
    format!("check_{class_id}_{date}")
}

/// One row of the class attendance grid as entered by a user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DayEntry {
    pub participant_id: String,
    pub participant_name: String,
    pub morning_code: String,
    pub afternoon_code: String,
    pub comment: String,
}

/// Validate a day of entries for `class_id` and turn them into records.
///
/// Blank codes default to X. Every entry using G without a comment is
/// reported in one error so the user can fix them together.
pub fn records_for_day(
    class_id: &str,
    date: &str,
    entries: &[DayEntry],
) -> Result<Vec<AttendanceRecord>, AttendanceError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| AttendanceError::InvalidDate(date.to_string()))?;

    let mut records = Vec::with_capacity(entries.len());
    let mut missing_comment = Vec::new();

    for entry in entries {
        let morning = parse_entry_code(entry, &entry.morning_code)?;
        let afternoon = parse_entry_code(entry, &entry.afternoon_code)?;
        let comment = entry.comment.trim();

        if (morning.requires_comment() || afternoon.requires_comment()) && comment.is_empty() {
            missing_comment.push(entry.participant_name.clone());
            continue;
        }

        records.push(AttendanceRecord::new(class_id, date, &entry.participant_id, morning, afternoon, comment));
    }

    if !missing_comment.is_empty() {
        return Err(AttendanceError::MissingComment { participants: missing_comment });
    }
    Ok(records)
}

fn parse_entry_code(entry: &DayEntry, raw: &str) -> Result<AttendanceCode, AttendanceError> {
    if raw.trim().is_empty() {
        return Ok(AttendanceCode::X);
    }
    raw.parse().map_err(|_| AttendanceError::UnknownCode {
        participant: entry.participant_name.clone(),
        code: raw.to_string(),
    })
}

/// Records of one participant falling in `month`, in date order.
pub fn for_participant_month(
    records: &[AttendanceRecord],
    participant_id: &str,
    month: TargetMonth,
) -> Vec<AttendanceRecord> {
    let mut selected: Vec<AttendanceRecord> = records
        .iter()
        .filter(|r| r.participant_id == participant_id && month.contains(&r.date))
        .cloned()
        .collect();
    selected.sort_by(|a, b| a.date.cmp(&b.date));
    selected
}
