//! MMT attendance tracking and the monthly attendance PDF form.
//!
//! The [`extractor`] reads an uploaded form into [`ParsedFormData`], the
//! [`generator`] fills a form for one participant and month. Both go through
//! the single field table in [`layout`].

pub mod attendance;
pub mod batch;
pub mod config;
pub mod dates;
pub mod error;
pub mod extractor;
pub mod form;
pub mod generator;
pub mod layout;
pub mod logging;
pub mod model;
pub mod report;
pub mod store;
pub mod template;

pub use attendance::{AttendanceCode, AttendanceRecord};
pub use dates::TargetMonth;
pub use error::{GenerateError, ParseError, Warning};
pub use extractor::{parse, ParsedFormData};
pub use generator::{generate, GenerationContext, Generated, SignatureOptions};
pub use model::{Class, Participant};
pub use store::Store;
