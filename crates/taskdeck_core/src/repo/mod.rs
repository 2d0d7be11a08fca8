//! Task repository.
//!
//! # Responsibility
//! - Serve reads from the in-memory cache.
//! - Serialize mutations through a single writer slot backed by a
//!   [`TaskStore`](crate::store::TaskStore).
//!
//! # Invariants
//! - The cache mirrors the last committed store state.
//! - Change events leave only after a successful commit.

pub mod task_repo;

pub use task_repo::{
    RepoError, RepoResult, RepositoryOptions, TaskRepository, DEFAULT_THEME, THEME_SETTING_KEY,
};
