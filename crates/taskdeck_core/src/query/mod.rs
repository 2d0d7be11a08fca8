//! Read-only derived views over repository snapshots.
//!
//! # Responsibility
//! - Filter and sort task snapshots for presentation.
//! - Summarize completion over a time window.
//!
//! # Invariants
//! - Views never mutate or own repository state.
//! - Output is deterministic for identical inputs.

pub mod filter;
pub mod report;
