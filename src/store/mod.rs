//! Persistence for participants, classes and attendance.
//!
//! Every backend holds the same flat JSON document ([`Database`]); the
//! [`Store`] operations are implemented once by [`DocumentStore`] over a
//! [`Backend`] that only knows how to load and save that document.
//!
//! - `memory`: nothing is persisted, used by tests and dry runs
//! - `json-file`: a JSON file on disk
//! - `http`: a JSON document fetched with GET and written back with PUT

pub mod backend;

use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::attendance::{check_id, AttendanceCheck, AttendanceRecord};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::model::{Class, Participant};

pub use backend::{Backend, HttpBackend, JsonFileBackend, MemoryBackend};

pub type MemoryStore = DocumentStore<MemoryBackend>;
pub type JsonFileStore = DocumentStore<JsonFileBackend>;
pub type HttpJsonStore = DocumentStore<HttpBackend>;

// ============================================================================
// Database document
// ============================================================================

/// The stored document, as written by every backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Database {
    pub participants: Vec<Participant>,
    pub classes: Vec<Class>,
    pub attendance: Vec<AttendanceRecord>,
    pub attendance_checks: Vec<AttendanceCheck>,
    pub archived_participants: Vec<Participant>,
}

impl Database {
    /// Move participants whose measure ended before `threshold` into the
    /// archive. Returns how many were moved.
    pub fn archive_expired(&mut self, threshold: NaiveDate) -> usize {
        let (expired, active): (Vec<_>, Vec<_>) = std::mem::take(&mut self.participants)
            .into_iter()
            .partition(|p| p.ended_before(threshold));
        self.participants = active;

        let moved = expired.len();
        for mut participant in expired {
            if self.archived_participants.iter().any(|a| a.id == participant.id) {
                continue;
            }
            participant.archived = true;
            self.archived_participants.push(participant);
        }
        moved
    }
}

/// Participants stay active until the end of the month their measure ends in.
pub fn archive_threshold(today: NaiveDate) -> NaiveDate {
    today.with_day(1).unwrap_or(today)
}

// ============================================================================
// Store trait
// ============================================================================

pub trait Store {
    fn get_participants(&self) -> Result<Vec<Participant>, StoreError>;

    /// Insert, or replace the participant with the same id.
    fn save_participant(&mut self, participant: &Participant) -> Result<(), StoreError>;

    fn delete_participant(&mut self, id: &str) -> Result<(), StoreError>;

    fn get_classes(&self) -> Result<Vec<Class>, StoreError>;

    fn save_class(&mut self, class: &Class) -> Result<(), StoreError>;

    fn delete_class(&mut self, id: &str) -> Result<(), StoreError>;

    fn get_attendances(&self) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// Upsert records by their composite id.
    fn save_attendance(&mut self, records: &[AttendanceRecord]) -> Result<(), StoreError>;

    fn mark_checked(&mut self, class_id: &str, date: &str) -> Result<(), StoreError>;

    fn is_checked(&self, class_id: &str, date: &str) -> Result<bool, StoreError>;

    fn get_participant(&self, id: &str) -> Result<Participant, StoreError> {
        self.get_participants()?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::NotFound { collection: "participant", id: id.to_string() })
    }

    fn get_class(&self, id: &str) -> Result<Class, StoreError> {
        self.get_classes()?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound { collection: "class", id: id.to_string() })
    }

    /// Case-insensitive lookup on first and last name.
    fn find_participant(&self, first_name: &str, last_name: &str) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .get_participants()?
            .into_iter()
            .find(|p| p.same_person(first_name, last_name)))
    }

    fn add_participant_to_class(&mut self, class_id: &str, participant_id: &str) -> Result<(), StoreError> {
        let mut class = self.get_class(class_id)?;
        if !class.has_participant(participant_id) {
            class.participant_ids.push(participant_id.to_string());
            self.save_class(&class)?;
        }
        Ok(())
    }
}

// ============================================================================
// Document-backed implementation
// ============================================================================

pub struct DocumentStore<B: Backend> {
    backend: B,
    db: Database,
}

impl<B: Backend> DocumentStore<B> {
    /// Load the document (empty when the backend has none yet) and archive
    /// participants that expired before the current month.
    pub fn open(backend: B) -> Result<Self, StoreError> {
        Self::open_at(backend, Local::now().date_naive())
    }

    pub fn open_at(backend: B, today: NaiveDate) -> Result<Self, StoreError> {
        let db = backend.load()?.unwrap_or_default();
        let mut store = Self { backend, db };
        debug!(
            backend = %store.backend.describe(),
            participants = store.db.participants.len(),
            classes = store.db.classes.len(),
            "store opened"
        );

        let moved = store.db.archive_expired(archive_threshold(today));
        if moved > 0 {
            info!(count = moved, "archived expired participants");
            store.persist()?;
        }
        Ok(store)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn archived_participants(&self) -> &[Participant] {
        &self.db.archived_participants
    }

    fn persist(&self) -> Result<(), StoreError> {
        self.backend.save(&self.db)
    }
}

fn upsert<T: Clone>(items: &mut Vec<T>, item: &T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
}

impl<B: Backend> Store for DocumentStore<B> {
    fn get_participants(&self) -> Result<Vec<Participant>, StoreError> {
        Ok(self.db.participants.clone())
    }

    fn save_participant(&mut self, participant: &Participant) -> Result<(), StoreError> {
        upsert(&mut self.db.participants, participant, |p| p.id == participant.id);
        self.persist()
    }

    fn delete_participant(&mut self, id: &str) -> Result<(), StoreError> {
        let before = self.db.participants.len();
        self.db.participants.retain(|p| p.id != id);
        if self.db.participants.len() == before {
            return Err(StoreError::NotFound { collection: "participant", id: id.to_string() });
        }
        for class in &mut self.db.classes {
            class.participant_ids.retain(|pid| pid != id);
        }
        self.persist()
    }

    fn get_classes(&self) -> Result<Vec<Class>, StoreError> {
        Ok(self.db.classes.clone())
    }

    fn save_class(&mut self, class: &Class) -> Result<(), StoreError> {
        upsert(&mut self.db.classes, class, |c| c.id == class.id);
        self.persist()
    }

    fn delete_class(&mut self, id: &str) -> Result<(), StoreError> {
        let before = self.db.classes.len();
        self.db.classes.retain(|c| c.id != id);
        if self.db.classes.len() == before {
            return Err(StoreError::NotFound { collection: "class", id: id.to_string() });
        }
        self.persist()
    }

    fn get_attendances(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self.db.attendance.clone())
    }

    fn save_attendance(&mut self, records: &[AttendanceRecord]) -> Result<(), StoreError> {
        for record in records {
            upsert(&mut self.db.attendance, record, |r| r.id == record.id);
        }
        self.persist()
    }

    fn mark_checked(&mut self, class_id: &str, date: &str) -> Result<(), StoreError> {
        let check = AttendanceCheck::now(class_id, date);
        upsert(&mut self.db.attendance_checks, &check, |c| c.id == check.id);
        self.persist()
    }

    fn is_checked(&self, class_id: &str, date: &str) -> Result<bool, StoreError> {
        let id = check_id(class_id, date);
        Ok(self.db.attendance_checks.iter().any(|c| c.id == id && c.checked))
    }
}

/// Open the store selected by configuration.
pub fn open_store(config: &StoreConfig) -> Result<Box<dyn Store>, StoreError> {
    Ok(match config {
        StoreConfig::Memory => Box::new(MemoryStore::open(MemoryBackend)?),
        StoreConfig::JsonFile { path } => Box::new(JsonFileStore::open(JsonFileBackend::new(path))?),
        StoreConfig::Http { url } => Box::new(HttpJsonStore::open(HttpBackend::new(url))?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::AttendanceCode;

    fn participant(id: &str, last: &str, date_end: &str) -> Participant {
        Participant {
            id: id.into(),
            first_name: "Jean".into(),
            last_name: last.into(),
            date_end: date_end.into(),
            ..Default::default()
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn participants_upsert_by_id() {
        let mut store = MemoryStore::open(MemoryBackend).unwrap();
        let mut p = participant("p1", "Dupont", "");
        store.save_participant(&p).unwrap();
        p.course_type = "MARKET0625".into();
        store.save_participant(&p).unwrap();

        let all = store.get_participants().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].course_type, "MARKET0625");
        assert!(store.find_participant("JEAN", "dupont").unwrap().is_some());
    }

    #[test]
    fn missing_items_are_not_found() {
        let mut store = MemoryStore::open(MemoryBackend).unwrap();
        assert!(matches!(store.get_participant("nope"), Err(StoreError::NotFound { collection: "participant", .. })));
        assert!(matches!(store.delete_class("nope"), Err(StoreError::NotFound { collection: "class", .. })));
    }

    #[test]
    fn class_membership() {
        let mut store = MemoryStore::open(MemoryBackend).unwrap();
        let class = Class::new("Matin");
        store.save_class(&class).unwrap();
        store.save_participant(&participant("p1", "Dupont", "")).unwrap();

        store.add_participant_to_class(&class.id, "p1").unwrap();
        store.add_participant_to_class(&class.id, "p1").unwrap();
        assert_eq!(store.get_class(&class.id).unwrap().participant_ids, vec!["p1".to_string()]);

        store.delete_participant("p1").unwrap();
        assert!(store.get_class(&class.id).unwrap().participant_ids.is_empty());
    }

    #[test]
    fn attendance_upserts_and_checks() {
        let mut store = MemoryStore::open(MemoryBackend).unwrap();
        let first = AttendanceRecord::new("c1", "2025-06-02", "p1", AttendanceCode::X, AttendanceCode::A, "");
        let again = AttendanceRecord::new("c1", "2025-06-02", "p1", AttendanceCode::B, AttendanceCode::B, "");
        store.save_attendance(&[first]).unwrap();
        store.save_attendance(&[again.clone()]).unwrap();
        assert_eq!(store.get_attendances().unwrap(), vec![again]);

        assert!(!store.is_checked("c1", "2025-06-02").unwrap());
        store.mark_checked("c1", "2025-06-02").unwrap();
        assert!(store.is_checked("c1", "2025-06-02").unwrap());
    }

    #[test]
    fn expired_participants_are_archived_on_open() {
        let mut db = Database::default();
        db.participants.push(participant("old", "Ancien", "2025-05-31"));
        db.participants.push(participant("current", "Actuel", "2025-06-03"));
        db.participants.push(participant("open", "Ouvert", ""));

        let moved = db.archive_expired(archive_threshold(date("2025-06-15")));
        assert_eq!(moved, 1);
        assert_eq!(db.participants.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["current", "open"]);
        assert_eq!(db.archived_participants.len(), 1);
        assert!(db.archived_participants[0].archived);

        // Already archived ids are not duplicated.
        db.participants.push(participant("old", "Ancien", "2025-05-31"));
        db.archive_expired(archive_threshold(date("2025-06-15")));
        assert_eq!(db.archived_participants.len(), 1);
    }

    #[test]
    fn database_json_field_names() {
        let mut db = Database::default();
        db.archived_participants.push(participant("a", "Ancien", "2020-01-31"));
        let json = serde_json::to_value(&db).unwrap();
        assert!(json.get("archivedParticipants").is_some());
        assert!(json.get("attendanceChecks").is_some());

        let parsed: Database = serde_json::from_str(r#"{"participants":[]}"#).unwrap();
        assert!(parsed.classes.is_empty());
    }
}
