//! Persistence adapter contracts and implementations.
//!
//! # Responsibility
//! - Translate tasks to and from durable storage.
//! - Wrap every write in a single all-or-nothing transaction.
//! - Own schema migration for the durable representation.
//!
//! # Invariants
//! - Row representations never leave this module.
//! - `update` succeeds only when the stored version equals the caller's
//!   expected version, and the written version is exactly one higher.
//! - A failed write leaves no partial state behind, batches included.

use crate::db::DbError;
use crate::model::task::{Task, TaskId};
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence-layer failure.
#[derive(Debug)]
pub enum StorageError {
    Db(DbError),
    /// Stored version differs from the caller's expected version.
    Conflict {
        id: TaskId,
        expected: u64,
        actual: u64,
    },
    NotFound(TaskId),
    AlreadyExists(TaskId),
    /// The store or a lock guarding it stayed busy past the bounded wait.
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    InvalidData(String),
}

impl StorageError {
    /// Reclassifies SQLite busy/locked failures as [`StorageError::Timeout`].
    pub(crate) fn busy_as_timeout(self, operation: &'static str, timeout: Duration) -> Self {
        match &self {
            Self::Db(DbError::Sqlite(err))
                if matches!(
                    err.sqlite_error_code(),
                    Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
                ) =>
            {
                Self::Timeout {
                    operation,
                    timeout_ms: duration_ms(timeout),
                }
            }
            _ => self,
        }
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Conflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on task {id}: expected {expected}, stored {actual}"
            ),
            Self::NotFound(id) => write!(f, "task not found in store: {id}"),
            Self::AlreadyExists(id) => write!(f, "task already stored: {id}"),
            Self::Timeout {
                operation,
                timeout_ms,
            } => write!(f, "storage operation `{operation}` timed out after {timeout_ms}ms"),
            Self::InvalidData(message) => write!(f, "invalid persisted task data: {message}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StorageError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Durable task storage contract.
///
/// Implementations are driven by exactly one writer at a time; the
/// repository serializes every call.
pub trait TaskStore: Send {
    /// Creates or upgrades the schema. Idempotent.
    fn migrate(&mut self) -> StorageResult<()>;

    /// Inserts a new task.
    fn insert(&mut self, task: &Task) -> StorageResult<()>;

    /// Replaces a stored task when its stored version equals
    /// `expected_version`. `task.version` must be `expected_version + 1`.
    fn update(&mut self, task: &Task, expected_version: u64) -> StorageResult<()>;

    /// Physically deletes one task.
    fn delete(&mut self, id: TaskId) -> StorageResult<()>;

    /// Applies every change in `batch`, or none of them.
    ///
    /// Inserts run first (in order, so parents precede their subtasks), then
    /// version-checked updates, then deletes.
    fn apply_batch(&mut self, batch: &WriteBatch) -> StorageResult<()>;

    /// Loads every stored task ordered by `created_at`, then `id`.
    fn load_all(&self) -> StorageResult<Vec<Task>>;

    fn load_setting(&self, key: &str) -> StorageResult<Option<String>>;

    fn save_setting(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Flushes and releases the underlying storage.
    fn close(self) -> StorageResult<()>
    where
        Self: Sized;
}

/// Multi-task change applied in one store transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub inserts: Vec<Task>,
    /// New value paired with the version it replaces.
    pub updates: Vec<(Task, u64)>,
    pub deletes: Vec<TaskId>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) -> &mut Self {
        self.inserts.push(task);
        self
    }

    pub fn update(&mut self, task: Task, expected_version: u64) -> &mut Self {
        self.updates.push((task, expected_version));
        self
    }

    pub fn delete(&mut self, id: TaskId) -> &mut Self {
        self.deletes.push(id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
