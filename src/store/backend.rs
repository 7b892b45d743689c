// Where the database document lives.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::Database;
use crate::error::StoreError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Loads and saves the whole document. `load` returns `None` when nothing
/// has been stored yet.
pub trait Backend {
    fn load(&self) -> Result<Option<Database>, StoreError>;

    fn save(&self, db: &Database) -> Result<(), StoreError>;

    fn describe(&self) -> String;
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBackend;

impl Backend for MemoryBackend {
    fn load(&self) -> Result<Option<Database>, StoreError> {
        Ok(None)
    }

    fn save(&self, _db: &Database) -> Result<(), StoreError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// JSON file
// ============================================================================

#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for JsonFileBackend {
    fn load(&self) -> Result<Option<Database>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Written to a sibling temp file first, then renamed over the target.
    fn save(&self, db: &Database) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(db)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "database saved");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json-file {}", self.path.display())
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// JSON document on a web server that accepts PUT to overwrite it.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    url: String,
    agent: ureq::Agent,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build();
        Self { url: url.into(), agent }
    }
}

impl Backend for HttpBackend {
    fn load(&self) -> Result<Option<Database>, StoreError> {
        let response = match self.agent.get(&self.url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(e) => return Err(StoreError::Http(format!("GET {}: {}", self.url, e))),
        };
        let text = response
            .into_string()
            .map_err(|e| StoreError::Http(format!("Failed to read response: {}", e)))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&self, db: &Database) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(db)?;
        self.agent
            .put(&self.url)
            .set("Content-Type", "application/json")
            .set("If-Match", "*")
            .send_string(&json)
            .map_err(|e| StoreError::Http(format!("PUT {}: {}", self.url, e)))?;
        debug!(url = %self.url, "database saved");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("http {}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Participant;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("db.json"));
        assert_eq!(backend.load().unwrap(), None);
    }

    #[test]
    fn file_round_trip() {
        let dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("nested").join("db.json"));
        let mut db = Database::default();
        db.participants.push(Participant { id: "p1".into(), last_name: "Dupont".into(), ..Default::default() });

        backend.save(&db).unwrap();
        assert_eq!(backend.load().unwrap(), Some(db));
        assert!(!dir.path().join("nested").join("db.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(JsonFileBackend::new(&path).load(), Err(StoreError::Json(_))));
    }

    #[test]
    fn unreachable_server_is_an_http_error() {
        let backend = HttpBackend::new("http://127.0.0.1:9/db.json");
        assert!(matches!(backend.load(), Err(StoreError::Http(_))));
    }
}
