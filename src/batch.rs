//! Many-document import and export. Each file or participant is processed
//! on its own; a failure is recorded in the [`BatchReport`] and the loop
//! moves on to the next item.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::attendance::{for_participant_month, AttendanceRecord};
use crate::dates::TargetMonth;
use crate::error::{GenerateError, ParseError, StoreError, Warning};
use crate::extractor;
use crate::generator::{self, GenerationContext, SignatureOptions};
use crate::model::{new_id, Participant};
use crate::report::{build_report, report_file_name, SummaryEntry};
use crate::store::Store;

#[derive(Error, Debug)]
pub enum BatchItemError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Generate(#[from] GenerateError),
    #[error("no original PDF and no template available")]
    MissingTemplate,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub item: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    fn record<T>(&mut self, item: String, result: Result<T, BatchItemError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.succeeded.push(item);
                Some(value)
            }
            Err(e) => {
                warn!(item = %item, error = %e, "batch item failed");
                self.failures.push(BatchFailure { item, reason: e.to_string() });
                None
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded.len(), self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.item, failure.reason)?;
        }
        Ok(())
    }
}

// ============================================================================
// Import
// ============================================================================

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct PdfUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl PdfUpload {
    pub fn read(path: &Path) -> std::io::Result<Self> {
        Ok(Self { file_name: path.display().to_string(), bytes: fs::read(path)? })
    }
}

/// Parse each upload and create or update its participant, keeping the file
/// as that participant's export template. With `class_id`, imported
/// participants are also enrolled in that class.
pub fn import_pdfs(store: &mut dyn Store, uploads: &[PdfUpload], class_id: Option<&str>) -> BatchReport {
    let mut report = BatchReport::default();
    info!(count = uploads.len(), "importing PDF forms");
    for upload in uploads {
        let result = import_one(store, upload, class_id);
        report.record(upload.file_name.clone(), result);
    }
    info!(succeeded = report.succeeded.len(), failed = report.failures.len(), "import complete");
    report
}

/// Read and import each file in turn. A file that cannot be read is a
/// failed item like one that cannot be parsed.
pub fn import_files(store: &mut dyn Store, paths: &[PathBuf], class_id: Option<&str>) -> BatchReport {
    let mut report = BatchReport::default();
    info!(count = paths.len(), "importing PDF files");
    for path in paths {
        let result = PdfUpload::read(path)
            .map_err(BatchItemError::from)
            .and_then(|upload| import_one(store, &upload, class_id));
        report.record(path.display().to_string(), result);
    }
    info!(succeeded = report.succeeded.len(), failed = report.failures.len(), "import complete");
    report
}

fn import_one(store: &mut dyn Store, upload: &PdfUpload, class_id: Option<&str>) -> Result<Participant, BatchItemError> {
    let parsed = extractor::parse(&upload.bytes, &upload.file_name)?;

    let mut participant = match store.find_participant(&parsed.first_name, &parsed.last_name)? {
        Some(mut existing) => {
            info!(name = %existing.full_name(), "participant exists, updating");
            existing.apply_parsed(&parsed);
            existing
        }
        None => {
            let mut created = Participant::from_parsed(&parsed);
            created.id = new_id();
            info!(name = %created.full_name(), "adding participant");
            created
        }
    };
    participant.set_original_pdf(&upload.bytes);
    store.save_participant(&participant)?;

    if let Some(class_id) = class_id {
        store.add_participant_to_class(class_id, &participant.id)?;
    }
    Ok(participant)
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Clone)]
pub struct ExportJob<'a> {
    pub month: TargetMonth,
    pub signature: SignatureOptions,
    pub location: &'a str,
    /// Used for participants without an uploaded original.
    pub fallback_template: Option<&'a [u8]>,
    pub out_dir: &'a Path,
    /// Off keeps the form fields editable.
    pub flatten: bool,
}

#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub participant_id: String,
    pub path: PathBuf,
    pub warnings: Vec<Warning>,
}

/// `MMT_{lastName}_{firstName}_{YYYY-MM}.pdf`
pub fn export_file_name(participant: &Participant, month: TargetMonth) -> String {
    let clean = |s: &str| s.trim().replace(['/', '\\'], "-");
    format!("MMT_{}_{}_{}.pdf", clean(&participant.last_name), clean(&participant.first_name), month)
}

/// Generate one form and write it into `job.out_dir`.
pub fn export_one(
    participant: &Participant,
    attendance: &[AttendanceRecord],
    job: &ExportJob<'_>,
) -> Result<ExportedFile, BatchItemError> {
    let original = participant.original_pdf_bytes();
    let template = match (original.as_deref(), job.fallback_template) {
        (Some(original), _) => original,
        (None, Some(fallback)) => fallback,
        (None, None) => return Err(BatchItemError::MissingTemplate),
    };

    let records = for_participant_month(attendance, &participant.id, job.month);
    let ctx = GenerationContext::new(participant, &records, template, job.month)
        .with_signature(job.signature.clone())
        .with_location(job.location)
        .with_flatten(job.flatten);
    let generated = generator::generate(&ctx)?;

    fs::create_dir_all(job.out_dir)?;
    let path = job.out_dir.join(export_file_name(participant, job.month));
    fs::write(&path, &generated.bytes)?;
    info!(path = %path.display(), "wrote form");

    Ok(ExportedFile { participant_id: participant.id.clone(), path, warnings: generated.warnings })
}

/// Unemployment office, then last name, both case-insensitive.
fn export_order(participants: &[Participant]) -> Vec<&Participant> {
    let mut ordered: Vec<&Participant> = participants.iter().collect();
    ordered.sort_by(|a, b| {
        a.unemployment_office
            .to_lowercase()
            .cmp(&b.unemployment_office.to_lowercase())
            .then_with(|| a.last_name.to_lowercase().cmp(&b.last_name.to_lowercase()))
    });
    ordered
}

/// Export every participant, ordered by unemployment office then last name.
pub fn export_participants(
    participants: &[Participant],
    attendance: &[AttendanceRecord],
    job: &ExportJob<'_>,
) -> (BatchReport, Vec<ExportedFile>) {
    let ordered = export_order(participants);

    let mut report = BatchReport::default();
    let mut files = Vec::new();
    info!(count = ordered.len(), month = %job.month, "exporting forms");
    for participant in ordered {
        let result = export_one(participant, attendance, job);
        if let Some(file) = report.record(participant.full_name(), result) {
            files.push(file);
        }
    }
    (report, files)
}

// ============================================================================
// Group report
// ============================================================================

/// Outcome of a merged export.
#[derive(Debug, Clone, Default)]
pub struct GroupReport {
    /// `None` when no form could be generated.
    pub path: Option<PathBuf>,
    /// Participants skipped because no original form was uploaded.
    pub missing_original: Vec<String>,
    pub warnings: Vec<Warning>,
}

fn generate_document(
    participant: &Participant,
    template: &[u8],
    attendance: &[AttendanceRecord],
    job: &ExportJob<'_>,
    warnings: &mut Vec<Warning>,
) -> Result<lopdf::Document, BatchItemError> {
    let records = for_participant_month(attendance, &participant.id, job.month);
    let ctx = GenerationContext::new(participant, &records, template, job.month)
        .with_signature(job.signature.clone())
        .with_location(job.location)
        .with_flatten(job.flatten);
    let generated = generator::generate(&ctx)?;
    warnings.extend(generated.warnings);
    lopdf::Document::load_mem(&generated.bytes)
        .map_err(|e| BatchItemError::Generate(GenerateError::Serialize(e.to_string())))
}

/// Fill the form of every participant that has an uploaded original and
/// write them as one `MMT_Export_Groupe_{YYYY-MM}.pdf`, followed by the
/// summary pages. Participants without an original are listed, not failed.
pub fn export_group_report(
    participants: &[Participant],
    attendance: &[AttendanceRecord],
    job: &ExportJob<'_>,
) -> Result<(BatchReport, GroupReport), BatchItemError> {
    let mut report = BatchReport::default();
    let mut group = GroupReport::default();
    let mut documents = Vec::new();
    let mut entries = Vec::new();

    info!(count = participants.len(), month = %job.month, "building group report");
    for participant in export_order(participants) {
        let Some(original) = participant.original_pdf_bytes() else {
            warn!(name = %participant.full_name(), "no original PDF, left out of the report");
            group.missing_original.push(participant.full_name());
            continue;
        };
        let result = generate_document(participant, &original, attendance, job, &mut group.warnings);
        if let Some(document) = report.record(participant.full_name(), result) {
            documents.push(document);
            entries.push(SummaryEntry {
                name: format!("{} {}", participant.last_name, participant.first_name).trim().to_string(),
                office: participant.unemployment_office.clone(),
            });
        }
    }

    if documents.is_empty() {
        return Ok((report, group));
    }

    let mut merged = build_report(documents, &entries, chrono::Local::now().date_naive())?;
    merged.compress();
    let mut bytes = Vec::new();
    merged
        .save_to(&mut bytes)
        .map_err(|e| GenerateError::Serialize(e.to_string()))?;

    fs::create_dir_all(job.out_dir)?;
    let path = job.out_dir.join(report_file_name(job.month));
    fs::write(&path, bytes)?;
    info!(path = %path.display(), forms = entries.len(), "wrote group report");
    group.path = Some(path);
    Ok((report, group))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBackend, MemoryStore};
    use crate::template;
    use tempfile::TempDir;

    fn upload(name: &str, bytes: Vec<u8>) -> PdfUpload {
        PdfUpload { file_name: name.into(), bytes }
    }

    #[test]
    fn import_collects_failures_and_deduplicates() {
        let mut store = MemoryStore::open(MemoryBackend).unwrap();
        let form = template::blank_form_with(&[("1.2", "Dupont"), ("1.3", "Jean")]).unwrap();
        let uploads = vec![
            upload("first.pdf", form.clone()),
            upload("broken.pdf", b"garbage".to_vec()),
            upload("again.pdf", form),
        ];

        let report = import_pdfs(&mut store, &uploads, None);
        assert_eq!(report.succeeded, vec!["first.pdf".to_string(), "again.pdf".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item, "broken.pdf");
        assert!(report.summary().starts_with("2 succeeded, 1 failed"));

        let participants = store.get_participants().unwrap();
        assert_eq!(participants.len(), 1);
        assert!(participants[0].original_pdf_bytes().is_some());
    }

    #[test]
    fn import_enrolls_into_class() {
        let mut store = MemoryStore::open(MemoryBackend).unwrap();
        let class = crate::model::Class::new("Groupe A");
        store.save_class(&class).unwrap();
        let form = template::blank_form_with(&[("1.2", "Muller")]).unwrap();

        let report = import_pdfs(&mut store, &[upload("m.pdf", form)], Some(&class.id));
        assert!(report.is_success());
        assert_eq!(store.get_class(&class.id).unwrap().participant_ids.len(), 1);
    }

    #[test]
    fn export_without_any_template_fails_per_item() {
        let dir = TempDir::new().unwrap();
        let fallback = template::blank_form().unwrap();
        let with_original = {
            let mut p = Participant { id: "a".into(), first_name: "Anna".into(), last_name: "Muller".into(), ..Default::default() };
            p.set_original_pdf(&fallback);
            p
        };
        let without = Participant { id: "b".into(), first_name: "Jean".into(), last_name: "Dupont".into(), ..Default::default() };
        let month = TargetMonth::new(2025, 6).unwrap();
        let job = ExportJob {
            month,
            signature: SignatureOptions::default(),
            location: "Porrentruy",
            fallback_template: None,
            out_dir: dir.path(),
            flatten: true,
        };

        let (report, files) = export_participants(&[without.clone(), with_original], &[], &job);
        assert_eq!(report.succeeded, vec!["Anna Muller".to_string()]);
        assert_eq!(report.failures, vec![BatchFailure { item: "Jean Dupont".into(), reason: "no original PDF and no template available".into() }]);
        assert_eq!(files.len(), 1);
        assert!(dir.path().join("MMT_Muller_Anna_2025-06.pdf").exists());

        let job = ExportJob { fallback_template: Some(&fallback), ..job };
        let (report, _) = export_participants(&[without], &[], &job);
        assert!(report.is_success());
        assert!(dir.path().join("MMT_Dupont_Jean_2025-06.pdf").exists());
    }

    #[test]
    fn import_files_records_unreadable_paths() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.pdf");
        fs::write(&good, template::blank_form_with(&[("1.2", "Dupont"), ("1.3", "Jean")]).unwrap()).unwrap();
        let missing = dir.path().join("missing.pdf");
        let mut store = MemoryStore::open(MemoryBackend).unwrap();

        let report = import_files(&mut store, &[good.clone(), missing.clone()], None);
        assert_eq!(report.succeeded, vec![good.display().to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item, missing.display().to_string());
        assert!(report.failures[0].reason.starts_with("IO error"));
        assert_eq!(store.get_participants().unwrap().len(), 1);
    }

    #[test]
    fn group_report_merges_forms_with_originals() {
        let dir = TempDir::new().unwrap();
        let original = template::blank_form().unwrap();
        let with_original = |id: &str, last: &str, office: &str| {
            let mut p = Participant {
                id: id.into(),
                first_name: "Anna".into(),
                last_name: last.into(),
                unemployment_office: office.into(),
                ..Default::default()
            };
            p.set_original_pdf(&original);
            p
        };
        let participants = vec![
            with_original("a", "Muller", "Unia"),
            with_original("b", "Berger", "Syna"),
            Participant { id: "c".into(), first_name: "Jean".into(), last_name: "Dupont".into(), ..Default::default() },
        ];
        let job = ExportJob {
            month: TargetMonth::new(2025, 6).unwrap(),
            signature: SignatureOptions::default(),
            location: "Porrentruy",
            fallback_template: Some(&original),
            out_dir: dir.path(),
            flatten: true,
        };

        let (report, group) = export_group_report(&participants, &[], &job).unwrap();
        assert_eq!(report.succeeded, vec!["Anna Berger", "Anna Muller"]);
        assert!(report.is_success());
        assert_eq!(group.missing_original, vec!["Jean Dupont"]);

        let path = group.path.unwrap();
        assert_eq!(path, dir.path().join("MMT_Export_Groupe_2025-06.pdf"));
        let merged = lopdf::Document::load(&path).unwrap();
        assert_eq!(merged.get_pages().len(), 2 * 2 + 1);
    }

    #[test]
    fn group_report_without_originals_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let job = ExportJob {
            month: TargetMonth::new(2025, 6).unwrap(),
            signature: SignatureOptions::default(),
            location: "Porrentruy",
            fallback_template: None,
            out_dir: dir.path(),
            flatten: true,
        };
        let person = Participant { id: "c".into(), last_name: "Dupont".into(), ..Default::default() };

        let (report, group) = export_group_report(&[person], &[], &job).unwrap();
        assert!(report.succeeded.is_empty());
        assert!(group.path.is_none());
        assert_eq!(group.missing_original, vec!["Dupont"]);
        assert!(!dir.path().join("MMT_Export_Groupe_2025-06.pdf").exists());
    }

    #[test]
    fn export_order_is_office_then_name() {
        let dir = TempDir::new().unwrap();
        let person = |last: &str, office: &str| Participant {
            id: last.into(),
            last_name: last.into(),
            unemployment_office: office.into(),
            ..Default::default()
        };
        let fallback = template::blank_form().unwrap();
        let job = ExportJob {
            month: TargetMonth::new(2025, 6).unwrap(),
            signature: SignatureOptions::default(),
            location: "Porrentruy",
            fallback_template: Some(&fallback),
            out_dir: dir.path(),
            flatten: true,
        };
        let (report, _) = export_participants(&[person("Zeller", "Unia"), person("Berger", "Unia"), person("Roth", "Syna")], &[], &job);
        assert_eq!(report.succeeded, vec!["Roth", "Berger", "Zeller"]);
    }
}
