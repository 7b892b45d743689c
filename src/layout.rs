// Field layout of the MMT monthly attendance form.
//
// The identifiers below were assigned by the designer of the official PDF
// template. They are a compatibility contract with that template and must be
// kept as fixed constants: the extractor and the generator both read this one
// table, so a change here changes both directions at once.

use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Number of day slots printed on the form, whatever the month length.
pub const DAYS_ON_FORM: u32 = 31;

/// Option of the presence-type radio group selected on every export.
pub const PRESENCE_TYPE_OPTION: &str = "Auswahl1";

/// Interruption radio group option meaning "no".
pub const INTERRUPTION_NO: &str = "Auswahl1";

/// Interruption radio group option meaning "yes".
pub const INTERRUPTION_YES: &str = "Auswahl2";

/// Location written next to the signature unless configured otherwise.
pub const DEFAULT_LOCATION: &str = "Porrentruy";

// ============================================================================
// Semantic keys
// ============================================================================

/// Semantic properties carried by a scalar (non-grid) form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarField {
    LastName,
    FirstName,
    AvsNumber,
    BirthDate,
    MonthYear,
    CourseType,
    DateStart,
    DateEnd,
    WorkPercent,
    DecisionNumber,
    UnemploymentOffice,
    ExecutionPlace,
    OrganizerName,
    OrganizerLastName,
    OrganizerFirstName,
    OrganizerPhone,
    OrganizerEmail,
    NoParticipation,
    Correction,
    Interruption,
    InterruptionDate,
    SignaturePlace,
    SignatureDate,
    Signature,
    Comments,
    PresenceType,
}

impl ScalarField {
    pub fn name(self) -> &'static str {
        match self {
            ScalarField::LastName => "lastName",
            ScalarField::FirstName => "firstName",
            ScalarField::AvsNumber => "avsNumber",
            ScalarField::BirthDate => "birthDate",
            ScalarField::MonthYear => "monthYear",
            ScalarField::CourseType => "courseType",
            ScalarField::DateStart => "dateStart",
            ScalarField::DateEnd => "dateEnd",
            ScalarField::WorkPercent => "workPercent",
            ScalarField::DecisionNumber => "decisionNumber",
            ScalarField::UnemploymentOffice => "unemploymentOffice",
            ScalarField::ExecutionPlace => "executionPlace",
            ScalarField::OrganizerName => "organizerName",
            ScalarField::OrganizerLastName => "organizerLastName",
            ScalarField::OrganizerFirstName => "organizerFirstName",
            ScalarField::OrganizerPhone => "organizerPhone",
            ScalarField::OrganizerEmail => "organizerEmail",
            ScalarField::NoParticipation => "noParticipation",
            ScalarField::Correction => "isCorrection",
            ScalarField::Interruption => "wasInterrupted",
            ScalarField::InterruptionDate => "interruptionDate",
            ScalarField::SignaturePlace => "signaturePlace",
            ScalarField::SignatureDate => "signatureDate",
            ScalarField::Signature => "signature",
            ScalarField::Comments => "comments",
            ScalarField::PresenceType => "presenceType",
        }
    }
}

impl fmt::Display for ScalarField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Layout table
// ============================================================================

/// Scalar field identifiers. A key listed twice has an alternate identifier;
/// the first entry is the primary one used for writing.
pub const SCALAR_FIELDS: &[(ScalarField, &str)] = &[
    // Participant
    (ScalarField::LastName, "1.2"),
    (ScalarField::FirstName, "1.3"),
    (ScalarField::AvsNumber, "Textfeld 61"),
    (ScalarField::AvsNumber, "Textfeld 43"),
    (ScalarField::BirthDate, "Textfeld 42"),
    (ScalarField::MonthYear, "Textfeld 98"),
    // Measure
    (ScalarField::CourseType, "1.68"),
    (ScalarField::DateStart, "1.49"),
    (ScalarField::DateEnd, "1.48"),
    (ScalarField::WorkPercent, "1.46"),
    (ScalarField::DecisionNumber, "1.139"),
    (ScalarField::UnemploymentOffice, "1.141"),
    (ScalarField::ExecutionPlace, "1.67"),
    // Organizer
    (ScalarField::OrganizerName, "1.4"),
    (ScalarField::OrganizerLastName, "1.32"),
    (ScalarField::OrganizerFirstName, "1.56"),
    (ScalarField::OrganizerPhone, "1.61"),
    (ScalarField::OrganizerEmail, "1.62"),
    // Flags
    (ScalarField::NoParticipation, "Kontrollkästchen 6"),
    (ScalarField::Correction, "Kontrollkästchen 7"),
    (ScalarField::Interruption, "Optionsfeld 70"),
    (ScalarField::InterruptionDate, "1.63"),
    (ScalarField::PresenceType, "Optionsfeld 6"),
    // Signature block
    (ScalarField::SignaturePlace, "5.19"),
    (ScalarField::SignatureDate, "Textfeld 103"),
    (ScalarField::Signature, "5.25"),
    (ScalarField::Comments, "1.172"),
];

/// Morning and afternoon field identifiers; index 0 is day 1.
pub const ATTENDANCE_FIELDS: [(&str, &str); DAYS_ON_FORM as usize] = [
    ("2.10146", "2.10147"),
    ("2.3015", "2.3016"),
    ("2.2031", "2.2032"),
    ("2.355", "2.356"),
    ("2.335", "2.336"),
    ("2.347", "2.348"),
    ("2.2039", "2.2040"),
    ("2.363", "2.364"),
    ("2.10150", "2.10151"),
    ("2.3019", "2.344"),
    ("2.2035", "2.2036"),
    ("2.359", "2.360"),
    ("2.339", "2.340"),
    ("2.351", "2.352"),
    ("2.3011", "2.3012"),
    ("2.367", "2.368"),
    ("2.10148", "2.10149"),
    ("2.3017", "2.3018"),
    ("2.2033", "2.2034"),
    ("2.357", "2.358"),
    ("2.337", "2.338"),
    ("2.349", "2.350"),
    ("2.343", "2.3010"),
    ("2.365", "2.366"),
    ("2.10152", "2.10153"),
    ("2.345", "2.346"),
    ("2.2037", "2.2038"),
    ("2.361", "2.362"),
    ("2.341", "2.342"),
    ("2.353", "2.354"),
    ("2.3013", "2.3014"),
];

/// Primary field identifier for a semantic key.
pub fn resolve(key: ScalarField) -> Option<&'static str> {
    SCALAR_FIELDS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, id)| *id)
}

/// Every identifier mapped to `key`, primary first.
pub fn identifiers(key: ScalarField) -> impl Iterator<Item = &'static str> {
    SCALAR_FIELDS
        .iter()
        .filter(move |(k, _)| *k == key)
        .map(|(_, id)| *id)
}

/// Semantic key of a field identifier, if the layout knows it.
pub fn key_of(field_id: &str) -> Option<ScalarField> {
    SCALAR_FIELDS
        .iter()
        .find(|(_, id)| *id == field_id)
        .map(|(k, _)| *k)
}

/// (morning, afternoon) identifiers of `day`, or `None` when the day is
/// outside 1..=31 or past the end of a month of `days_in_month` days.
pub fn attendance_fields_for_day(day: u32, days_in_month: u32) -> Option<(&'static str, &'static str)> {
    if day == 0 || day > DAYS_ON_FORM || day > days_in_month {
        return None;
    }
    Some(ATTENDANCE_FIELDS[(day - 1) as usize])
}

/// Day number (1-based) and half-day of a grid identifier.
pub fn grid_position(field_id: &str) -> Option<(u32, HalfDay)> {
    ATTENDANCE_FIELDS
        .iter()
        .enumerate()
        .find_map(|(idx, (am, pm))| {
            if *am == field_id {
                Some((idx as u32 + 1, HalfDay::Morning))
            } else if *pm == field_id {
                Some((idx as u32 + 1, HalfDay::Afternoon))
            } else {
                None
            }
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfDay {
    Morning,
    Afternoon,
}
