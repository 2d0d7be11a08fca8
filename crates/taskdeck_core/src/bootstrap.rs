//! Startup wiring from [`CoreConfig`] to a ready repository.

use crate::config::{ConfigError, CoreConfig};
use crate::logging::{init_logging, LoggingError};
use crate::notify::ChangeNotifier;
use crate::repo::{RepoError, RepositoryOptions, TaskRepository};
use crate::store::SqliteTaskStore;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Startup failure. Any of these is fatal for the host.
#[derive(Debug)]
pub enum StartupError {
    Config(ConfigError),
    Logging(LoggingError),
    Repo(RepoError),
}

impl Display for StartupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
            Self::Logging(err) => write!(f, "logging setup failed: {err}"),
            Self::Repo(err) => write!(f, "task store unavailable: {err}"),
        }
    }
}

impl Error for StartupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Logging(err) => Some(err),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<ConfigError> for StartupError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<LoggingError> for StartupError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<RepoError> for StartupError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Validates `config`, starts logging when configured, then opens, migrates
/// and loads the SQLite-backed repository.
pub fn open_repository(
    config: &CoreConfig,
    notifier: Arc<ChangeNotifier>,
) -> Result<TaskRepository<SqliteTaskStore>, StartupError> {
    config.validate()?;
    if let Some(log_dir) = config.log_dir.as_deref() {
        init_logging(&config.log_level, log_dir)?;
    }

    let timeout = config.storage_timeout();
    let store = SqliteTaskStore::open(config.db_path(), timeout)
        .map_err(|err| StartupError::Repo(RepoError::Storage(err)))?;
    let repo = TaskRepository::open_with(
        store,
        notifier,
        RepositoryOptions::default().with_timeout(timeout),
    )
    .map_err(|err| {
        error!("event=startup module=core status=error error={err}");
        err
    })?;

    info!(
        "event=startup module=core status=ok db_path={}",
        config.db_path().display()
    );
    Ok(repo)
}
