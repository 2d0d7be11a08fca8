//! Core runtime configuration.
//!
//! # Responsibility
//! - Describe where the store lives and how long storage work may block.
//! - Validate host-supplied settings before anything is opened.
//!
//! # Invariants
//! - `storage_timeout_ms` is strictly positive.
//! - `log_dir`, when set, is absolute.

use crate::logging::{default_log_level, normalize_level, normalize_log_dir};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DB_FILE_NAME: &str = "taskdeck.sqlite3";
pub const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 5_000;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    EmptyDbPath,
    ZeroTimeout,
    InvalidLogLevel(String),
    InvalidLogDir(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDbPath => write!(f, "db_path must not be empty"),
            Self::ZeroTimeout => write!(f, "storage_timeout_ms must be greater than zero"),
            Self::InvalidLogLevel(message) => write!(f, "{message}"),
            Self::InvalidLogDir(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ConfigError {}

/// Startup settings for the task core.
///
/// Every field has a default, so hosts may deserialize a partial document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Embedded database file.
    pub db_path: PathBuf,
    /// Upper bound for lock waits and busy storage.
    pub storage_timeout_ms: u64,
    /// One of trace|debug|info|warn|error.
    pub log_level: String,
    /// Rolling log directory. Logging stays off when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE_NAME),
            storage_timeout_ms: DEFAULT_STORAGE_TIMEOUT_MS,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl CoreConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_logging(mut self, level: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        self.log_level = level.into();
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Checks every field without touching the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDbPath);
        }
        if self.storage_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        normalize_level(&self.log_level)
            .map_err(|err| ConfigError::InvalidLogLevel(err.to_string()))?;
        if let Some(log_dir) = self.log_dir.as_deref() {
            normalize_log_dir(log_dir).map_err(|err| ConfigError::InvalidLogDir(err.to_string()))?;
        }
        Ok(())
    }
}
