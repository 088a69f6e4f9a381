//! Store configuration.
//!
//! Defines the YAML-serializable settings that control where the database
//! lives, how it is opened, and what the startup sequence does. Every field
//! has a default, so an empty file is a valid configuration.
//!
//! # Example YAML
//!
//! ```yaml
//! database: db.sqlite3
//! provider_name: rusqlite
//! fresh_start: false
//! auto_migrate: true
//! seed: true
//! page_size: 64
//! journal_mode: wal
//! ```

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// A setting is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// SQLite journal mode applied when the database is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Rollback journal, deleted after each transaction.
    Delete,
    /// Rollback journal, truncated after each transaction.
    Truncate,
    /// Write-ahead log (the default).
    #[default]
    Wal,
    /// In-memory journal.
    Memory,
}

impl JournalMode {
    /// Returns the `PRAGMA journal_mode` argument.
    pub fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Wal => "WAL",
            JournalMode::Memory => "MEMORY",
        }
    }
}

/// Settings for opening and initializing a [`Database`](crate::Database).
///
/// # Examples
///
/// ```
/// # use entity_store_sqlite::StoreConfig;
/// let config: StoreConfig = serde_yaml::from_str("database: blog.sqlite3\nseed: false\n").unwrap();
/// assert_eq!(config.database.to_str(), Some("blog.sqlite3"));
/// assert!(!config.seed);
/// assert_eq!(config.provider_name, "rusqlite");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file, created if absent.
    pub database: PathBuf,
    /// Provider name recorded on every applied migration.
    pub provider_name: String,
    /// Delete the database file before opening it.
    pub fresh_start: bool,
    /// Apply pending migrations at startup without review.
    pub auto_migrate: bool,
    /// Insert sample data at startup when the database is empty.
    pub seed: bool,
    /// Rows fetched per round trip by lazy query iterators.
    pub page_size: usize,
    /// Journal mode set when opening a file-backed database.
    pub journal_mode: JournalMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("db.sqlite3"),
            provider_name: "rusqlite".to_string(),
            fresh_start: false,
            auto_migrate: true,
            seed: true,
            page_size: 64,
            journal_mode: JournalMode::default(),
        }
    }
}

impl StoreConfig {
    /// Default configuration pointing at `path`.
    pub fn with_database(path: impl Into<PathBuf>) -> Self {
        Self {
            database: path.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from a YAML file and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if the file cannot be read,
    /// [`ConfigError::YamlError`] if parsing fails, or
    /// [`ConfigError::Invalid`] if a setting is out of range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Checks settings that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".to_string()));
        }
        if self.provider_name.trim().is_empty() {
            return Err(ConfigError::Invalid("provider_name cannot be empty".to_string()));
        }
        if self.database.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database path cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_yields_defaults() {
        let config: StoreConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_journal_mode_parses_lowercase() {
        let config: StoreConfig = serde_yaml::from_str("journal_mode: truncate").unwrap();
        assert_eq!(config.journal_mode, JournalMode::Truncate);
        assert_eq!(config.journal_mode.pragma_value(), "TRUNCATE");

        let bad: Result<StoreConfig, _> = serde_yaml::from_str("journal_mode: sideways");
        assert!(bad.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let config = StoreConfig {
            page_size: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_blank_provider() {
        let config = StoreConfig {
            provider_name: "  ".to_string(),
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");
        let config = StoreConfig {
            fresh_start: true,
            page_size: 2,
            ..StoreConfig::with_database(dir.path().join("blog.sqlite3"))
        };
        config.save(&path).unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = StoreConfig::load("/nonexistent/store.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
