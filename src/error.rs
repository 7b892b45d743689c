// Error and warning types shared by the extractor, generator and store.

use std::fmt;
use thiserror::Error;

/// Fatal to a single `extractor::parse` call.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{file_name}: cannot read PDF form: {reason}")]
    Extraction { file_name: String, reason: String },
    #[error("{file_name}: participant last name not found in form fields or file name")]
    MissingIdentity { file_name: String },
}

impl ParseError {
    pub fn file_name(&self) -> &str {
        match self {
            ParseError::Extraction { file_name, .. } => file_name,
            ParseError::MissingIdentity { file_name } => file_name,
        }
    }
}

/// Fatal to a single `generator::generate` call.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Template is not a form-bearing PDF: {0}")]
    Template(String),
    #[error("Failed to serialize PDF: {0}")]
    Serialize(String),
}

/// Low-level AcroForm failures; callers turn these into warnings or into
/// one of the fatal errors above.
#[derive(Error, Debug)]
pub enum FormError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("document has no interactive form")]
    NoForm,
    #[error("field not found")]
    FieldNotFound,
    #[error("field is a {actual}, expected a {expected}")]
    WrongKind { expected: &'static str, actual: &'static str },
    #[error("option {0:?} not offered by field")]
    UnknownOption(String),
    #[error("unexpected object type")]
    UnexpectedObject,
    #[error("content encoding failed: {0}")]
    Content(String),
}

/// Non-fatal problems collected while reading or writing a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    FieldRead { field: String, reason: String },
    FieldWrite { field: String, reason: String },
    ImageEmbed(String),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::FieldRead { field, reason } => write!(f, "could not read field {field:?}: {reason}"),
            Warning::FieldWrite { field, reason } => write!(f, "could not set field {field:?}: {reason}"),
            Warning::ImageEmbed(reason) => write!(f, "signature image skipped: {reason}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid database JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("{collection} {id} not found")]
    NotFound { collection: &'static str, id: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Rejected attendance entry; raised before anything reaches storage.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AttendanceError {
    #[error("Comment required for code G (other justified absence): {}", participants.join(", "))]
    MissingComment { participants: Vec<String> },
    #[error("Unknown attendance code {code:?} for {participant}")]
    UnknownCode { participant: String, code: String },
    #[error("Invalid date {0:?} (expected YYYY-MM-DD)")]
    InvalidDate(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid month format (expected YYYY-MM): {0}")]
pub struct MonthError(pub String);
