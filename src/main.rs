// mmt-attendance: Import, track and export MMT attendance forms

use std::io::Read;
use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{debug, warn};

use mmt_attendance::attendance::{code_table, records_for_day, DayEntry};
use mmt_attendance::batch::{self, BatchItemError, ExportJob};
use mmt_attendance::config::{Config, StoreConfig};
use mmt_attendance::error::{AttendanceError, ConfigError, GenerateError, MonthError, ParseError, StoreError};
use mmt_attendance::generator::SignatureOptions;
use mmt_attendance::logging::init_logging;
use mmt_attendance::store::{open_store, Store};
use mmt_attendance::{extractor, template, Class, Participant, TargetMonth};

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    ParseError(#[from] ParseError),
    #[error("Failed to create PDF: {0}")]
    GenerateError(#[from] GenerateError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("{0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    MonthError(#[from] MonthError),
    #[error("{0}")]
    AttendanceError(#[from] AttendanceError),
    #[error("Export failed: {0}")]
    ExportError(#[from] BatchItemError),
    #[error("Invalid date format: {0} (expected DD.MM.YYYY)")]
    DateError(String),
    #[error("Failed to load signature: {0}")]
    SignatureError(String),
    #[error("Failed to read entries file: {0}")]
    EntriesError(String),
    #[error("{0} item(s) failed")]
    BatchFailed(usize),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// ============================================================================
// Data Structures
// ============================================================================

/// CLI Arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Track MMT attendance and fill the monthly attendance form")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON database file (overrides the configured store)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Signature place printed on exported forms (overrides the configuration)
    #[arg(long, global = true)]
    location: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read filled forms and create or update their participants
    Import {
        /// PDF files to import
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Also enrol the participants in this class
        #[arg(long)]
        class: Option<String>,
    },

    /// Fill the form of one participant for one month
    Export {
        /// Participant id
        #[arg(short, long)]
        participant: String,

        #[command(flatten)]
        export: ExportArgs,
    },

    /// Fill the forms of every active participant (or a selection) for one month
    ExportBatch {
        /// Only participants of these classes (repeatable)
        #[arg(long)]
        class: Vec<String>,

        /// Also select participants that belong to no class
        #[arg(long)]
        no_class: bool,

        /// Write one merged report with a summary page instead of one file per participant
        #[arg(long)]
        merge: bool,

        #[command(flatten)]
        export: ExportArgs,
    },

    /// Write an empty form
    BlankTemplate {
        /// Output filename
        #[arg(short, long, default_value = "mmt-template.pdf")]
        output: PathBuf,
    },

    /// List the attendance codes
    Codes,

    /// Print what the extractor reads from a form, as JSON
    Inspect {
        file: PathBuf,
    },

    /// Record one day of attendance for a class
    Record {
        #[arg(long)]
        class: String,

        /// Date (YYYY-MM-DD)
        #[arg(short, long)]
        date: String,

        /// JSON array of entries: participantId, participantName, morningCode, afternoonCode, comment
        #[arg(short, long)]
        entries: PathBuf,

        /// Mark the day as checked
        #[arg(long)]
        checked: bool,
    },

    /// Create a class
    NewClass {
        #[arg(short, long)]
        name: String,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// List active participants
    Participants,
}

#[derive(clap::Args, Debug)]
struct ExportArgs {
    /// Month (YYYY-MM, defaults to the current month)
    #[arg(short, long)]
    month: Option<String>,

    /// Signature date (DD.MM.YYYY, defaults to today)
    #[arg(long)]
    signature_date: Option<String>,

    /// Tick the correction box
    #[arg(long)]
    correction: bool,

    /// Signature image (PNG or JPEG file path, URL or data URL)
    #[arg(long)]
    signature: Option<String>,

    /// Template for participants without an uploaded form (defaults to the blank form)
    #[arg(long)]
    template: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Keep the form fields editable
    #[arg(long)]
    no_flatten: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(path) = &args.db {
        config.store = StoreConfig::JsonFile { path: path.clone() };
    }
    if let Some(location) = &args.location {
        config.location = location.clone();
    }
    let level = if args.verbose { "debug" } else { config.log_level.as_str() };
    init_logging(level);
    debug!(?config, "configuration loaded");

    match args.command {
        Command::Import { files, class } => {
            let mut store = open_store(&config.store)?;
            let report = batch::import_files(store.as_mut(), &files, class.as_deref());
            println!("Import: {}", report.summary());
            if !report.is_success() {
                return Err(AppError::BatchFailed(report.failures.len()));
            }
        }

        Command::Export { participant, export } => {
            let store = open_store(&config.store)?;
            let participant = store.get_participant(&participant)?;
            let attendance = store.get_attendances()?;
            let prepared = PreparedExport::new(&export)?;
            let job = prepared.job(&export, &config.location);

            let file = batch::export_one(&participant, &attendance, &job)?;
            for warning in &file.warnings {
                eprintln!("Warning: {}", warning);
            }
            println!("✓ Generated: {}", file.path.display());
            println!("  Participant: {}", participant.full_name());
            println!("  Month: {}", job.month);
        }

        Command::ExportBatch { class, no_class, merge, export } => {
            let store = open_store(&config.store)?;
            let participants = select_participants(store.as_ref(), &class, no_class)?;
            let attendance = store.get_attendances()?;
            let prepared = PreparedExport::new(&export)?;
            let job = prepared.job(&export, &config.location);

            if merge {
                let (report, group) = batch::export_group_report(&participants, &attendance, &job)?;
                for warning in &group.warnings {
                    eprintln!("Warning: {}", warning);
                }
                for name in &group.missing_original {
                    eprintln!("Warning: no original PDF for {}", name);
                }
                match &group.path {
                    Some(path) => println!("✓ Generated: {}", path.display()),
                    None => println!("No form could be generated"),
                }
                println!("Export: {}", report.summary());
                if !report.is_success() {
                    return Err(AppError::BatchFailed(report.failures.len()));
                }
                return Ok(());
            }

            let (report, files) = batch::export_participants(&participants, &attendance, &job);
            for file in &files {
                println!("✓ Generated: {}", file.path.display());
                for warning in &file.warnings {
                    eprintln!("  Warning: {}", warning);
                }
            }
            println!("Export: {}", report.summary());
            if !report.is_success() {
                return Err(AppError::BatchFailed(report.failures.len()));
            }
        }

        Command::BlankTemplate { output } => {
            let bytes = template::blank_form()?;
            std::fs::write(&output, bytes)?;
            println!("✓ Generated: {}", output.display());
        }

        Command::Codes => {
            for info in code_table() {
                let note = if info.requires_comment { " (comment required)" } else { "" };
                println!("{}  {}{}", info.code, info.description, note);
            }
        }

        Command::Inspect { file } => {
            let bytes = std::fs::read(&file)?;
            let parsed = extractor::parse(&bytes, &file.display().to_string())?;
            for warning in &parsed.warnings {
                eprintln!("Warning: {}", warning);
            }
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }

        Command::Record { class, date, entries, checked } => {
            let mut store = open_store(&config.store)?;
            let class = store.get_class(&class)?;
            let entries = load_entries(&entries)?;
            let records = records_for_day(&class.id, &date, &entries)?;
            store.save_attendance(&records)?;
            if checked {
                store.mark_checked(&class.id, &date)?;
            }
            println!("✓ Recorded {} participant(s) for {} on {}", records.len(), class.name, date);
        }

        Command::NewClass { name, description } => {
            let mut store = open_store(&config.store)?;
            let class = Class { description, ..Class::new(name) };
            store.save_class(&class)?;
            println!("{}", class.id);
        }

        Command::Participants => {
            let store = open_store(&config.store)?;
            for p in store.get_participants()? {
                println!("{}  {}  {}  {} → {}", p.id, p.full_name(), p.course_type, p.date_start, p.date_end);
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Export inputs loaded from disk before any participant is processed.
struct PreparedExport {
    month: TargetMonth,
    signature: SignatureOptions,
    template: Vec<u8>,
}

impl PreparedExport {
    fn new(args: &ExportArgs) -> Result<Self, AppError> {
        let month = match &args.month {
            Some(m) => m.parse::<TargetMonth>()?,
            None => TargetMonth::current(),
        };
        let signature = SignatureOptions {
            date: parse_signature_date(&args.signature_date)?,
            is_correction: args.correction,
            image: load_signature(&args.signature)?,
        };
        let template = match &args.template {
            Some(path) => std::fs::read(path)?,
            None => template::blank_form()?,
        };
        Ok(Self { month, signature, template })
    }

    fn job<'a>(&'a self, args: &'a ExportArgs, location: &'a str) -> ExportJob<'a> {
        ExportJob {
            month: self.month,
            signature: self.signature.clone(),
            location,
            fallback_template: Some(&self.template),
            out_dir: &args.out_dir,
            flatten: !args.no_flatten,
        }
    }
}

/// Members of the given classes, plus participants of no class with
/// `no_class`. Everyone when nothing is selected.
fn select_participants(store: &dyn Store, class_ids: &[String], no_class: bool) -> Result<Vec<Participant>, AppError> {
    let participants = store.get_participants()?;
    if class_ids.is_empty() && !no_class {
        return Ok(participants);
    }

    let selected = class_ids
        .iter()
        .map(|id| store.get_class(id))
        .collect::<Result<Vec<Class>, _>>()?;
    let all_classes = if no_class { store.get_classes()? } else { Vec::new() };

    Ok(participants
        .into_iter()
        .filter(|p| {
            selected.iter().any(|c| c.has_participant(&p.id))
                || (no_class && !all_classes.iter().any(|c| c.has_participant(&p.id)))
        })
        .collect())
}

fn parse_signature_date(date_str: &Option<String>) -> Result<Option<String>, AppError> {
    match date_str {
        Some(s) => NaiveDate::parse_from_str(s, "%d.%m.%Y")
            .map(|_| Some(s.clone()))
            .map_err(|_| AppError::DateError(s.clone())),
        None => Ok(None),
    }
}

/// Signature as a data URL, from a file, a URL or a data URL given as is.
fn load_signature(source: &Option<String>) -> Result<Option<String>, AppError> {
    let Some(s) = source else { return Ok(None) };
    if s.starts_with("data:") {
        return Ok(Some(s.clone()));
    }

    let image_bytes = if s.starts_with("http://") || s.starts_with("https://") {
        let response = ureq::get(s)
            .call()
            .map_err(|e| AppError::SignatureError(format!("Failed to fetch URL: {}", e)))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| AppError::SignatureError(format!("Failed to read response: {}", e)))?;
        bytes
    } else {
        std::fs::read(s).map_err(|e| AppError::SignatureError(format!("{}: {}", s, e)))?
    };

    let mime = match ::image::guess_format(&image_bytes) {
        Ok(::image::ImageFormat::Png) => "image/png",
        Ok(::image::ImageFormat::Jpeg) => "image/jpeg",
        _ => {
            warn!(source = %s, "signature is neither PNG nor JPEG");
            "application/octet-stream"
        }
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(&image_bytes);
    Ok(Some(format!("data:{};base64,{}", mime, encoded)))
}

fn load_entries(path: &Path) -> Result<Vec<DayEntry>, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::EntriesError(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&content).map_err(|e| AppError::EntriesError(format!("Invalid JSON: {}", e)))
}
