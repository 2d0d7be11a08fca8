//! Task store and synchronization core for Taskdeck.
//! This crate is the single source of truth for task invariants.

pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod query;
pub mod repo;
pub mod store;

pub use bootstrap::{open_repository, StartupError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, CoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::task::{
    can_transition, Priority, Task, TaskDraft, TaskId, TaskPatch, TaskStatus, TaskValidationError,
};
pub use notify::{
    ChangeNotifier, DeliveryReport, ObserverError, SubscriptionHandle, TaskEvent, TaskEventKind,
    TaskObserver,
};
pub use query::filter::{tree_view, view, ParentScope, SortKey, TaskCriteria, TaskNode};
pub use query::report::{report, CompletionReport, DailyCount, ReportError};
pub use repo::{RepoError, RepoResult, RepositoryOptions, TaskRepository};
pub use store::{
    MemoryTaskStore, SqliteTaskStore, StorageError, StorageResult, TaskStore, WriteBatch,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
