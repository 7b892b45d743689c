// Optional TOML configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::layout::DEFAULT_LOCATION;

pub const DEFAULT_DB_PATH: &str = "mmt_db.json";

/// Which backend holds the database document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StoreConfig {
    Memory,
    JsonFile {
        #[serde(default = "default_db_path")]
        path: PathBuf,
    },
    Http {
        url: String,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::JsonFile { path: default_db_path() }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// ```toml
/// location = "Porrentruy"
/// log_level = "debug"
///
/// [store]
/// kind = "json-file"
/// path = "data/mmt_db.json"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    /// Printed as the signature place on every exported form.
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            location: default_location(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.location, "Porrentruy");
        assert_eq!(config.store, StoreConfig::JsonFile { path: PathBuf::from("mmt_db.json") });
    }

    #[test]
    fn store_kinds() {
        let config = Config::from_toml("[store]\nkind = \"memory\"\n").unwrap();
        assert_eq!(config.store, StoreConfig::Memory);

        let config = Config::from_toml("location = \"Delémont\"\n[store]\nkind = \"http\"\nurl = \"https://example.org/db.json\"\n").unwrap();
        assert_eq!(config.store, StoreConfig::Http { url: "https://example.org/db.json".into() });
        assert_eq!(config.location, "Delémont");

        let config = Config::from_toml("[store]\nkind = \"json-file\"\n").unwrap();
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(Config::from_toml("[store]\nkind = \"firebase\"\n"), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn missing_file_names_path() {
        let err = Config::load_from_file("/nonexistent/mmt.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mmt.toml"));
    }
}
