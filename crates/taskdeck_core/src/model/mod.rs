//! Task domain model.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep validation and lifecycle rules pure and side-effect free.
//!
//! # Invariants
//! - Every task is identified by a stable, repository-assigned `TaskId`.
//! - Logical deletion is the `Archived` status; physical removal is explicit.

pub mod task;
