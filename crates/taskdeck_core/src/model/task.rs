//! Task domain model.
//!
//! # Responsibility
//! - Define the canonical task record owned by the repository.
//! - Provide pure validation and status-transition rules.
//! - Build new task values from caller drafts and patches.
//!
//! # Invariants
//! - `id` is stable and never nil.
//! - `title` is never blank and at most [`TITLE_MAX_CHARS`] characters.
//! - `updated_at` is never earlier than `created_at`.
//! - `Archived` is terminal: no transition leaves it.
//! - A task is never its own parent.
//! - Every successful patch bumps `version` by exactly one.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier assigned by the repository on creation.
pub type TaskId = Uuid;

/// Maximum title length in characters.
pub const TITLE_MAX_CHARS: usize = 255;
/// Maximum description length in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 4000;
/// Maximum tag label length in characters.
pub const TAG_MAX_CHARS: usize = 32;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid tag regex"));

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not started.
    Open,
    /// Work is in progress.
    InProgress,
    /// Completed.
    Done,
    /// Logically deleted. Terminal.
    Archived,
}

impl TaskStatus {
    /// Stable storage/wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Archived => "archived",
        }
    }

    /// Parses a storage/wire name produced by [`TaskStatus::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Archived
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered task priority. `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Returns whether the status graph allows moving from `from` to `to`.
///
/// Statuses only move forward along `Open -> InProgress -> Done -> Archived`;
/// skipping stages is allowed. Keeping the same status is a no-op.
/// `Archived` is terminal.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    from == to || (from != TaskStatus::Archived && to > from)
}

/// Checks every field invariant of `task`. Pure.
pub fn validate(task: &Task) -> Result<(), TaskValidationError> {
    task.validate()
}

/// Validation failures for task data. Invalid data is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    NilId,
    EmptyTitle,
    TitleTooLong { chars: usize, max: usize },
    DescriptionTooLong { chars: usize, max: usize },
    InvalidTag(String),
    UpdatedBeforeCreated { created_at: i64, updated_at: i64 },
    CompletedBeforeCreated { created_at: i64, completed_at: i64 },
    IllegalTransition { from: TaskStatus, to: TaskStatus },
    SelfParent,
    /// Subtasks hang off top-level tasks only.
    NestedSubtask { parent: TaskId },
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "task id must not be nil"),
            Self::EmptyTitle => write!(f, "task title must not be blank"),
            Self::TitleTooLong { chars, max } => {
                write!(f, "task title has {chars} chars, max is {max}")
            }
            Self::DescriptionTooLong { chars, max } => {
                write!(f, "task description has {chars} chars, max is {max}")
            }
            Self::InvalidTag(tag) => write!(
                f,
                "invalid tag `{tag}`: expected 1..={TAG_MAX_CHARS} chars of [a-z0-9_-]"
            ),
            Self::UpdatedBeforeCreated {
                created_at,
                updated_at,
            } => write!(
                f,
                "updated_at ({updated_at}) must be >= created_at ({created_at})"
            ),
            Self::CompletedBeforeCreated {
                created_at,
                completed_at,
            } => write!(
                f,
                "completed_at ({completed_at}) must be >= created_at ({created_at})"
            ),
            Self::IllegalTransition { from, to } => {
                write!(f, "illegal status transition {from} -> {to}")
            }
            Self::SelfParent => write!(f, "task cannot be its own parent"),
            Self::NestedSubtask { parent } => {
                write!(f, "task {parent} is itself a subtask and cannot take children")
            }
        }
    }
}

impl Error for TaskValidationError {}

/// Canonical task record.
///
/// Instances handed out by the repository are snapshots; mutating them has
/// no effect on stored state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTask")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    /// Unix epoch milliseconds.
    pub due_at: Option<i64>,
    /// Normalized lowercase labels, unique by construction.
    pub tags: BTreeSet<String>,
    /// Unix epoch milliseconds, set by the repository.
    pub created_at: i64,
    /// Unix epoch milliseconds, set by the repository.
    pub updated_at: i64,
    /// Set when the task first enters `Done`.
    pub completed_at: Option<i64>,
    /// Optimistic-concurrency counter, starts at 0.
    pub version: u64,
    /// Top-level task this subtask belongs to.
    pub parent_id: Option<TaskId>,
    /// Set once an unfinished task has been copied forward by carry-over.
    pub carried_over: bool,
}

impl Task {
    /// Builds a fresh `Open` task from a caller draft.
    ///
    /// # Invariants
    /// - `version == 0` and `created_at == updated_at == now`.
    /// - Title/description/tags are normalized before validation.
    pub fn from_draft(
        id: TaskId,
        draft: &TaskDraft,
        now: i64,
    ) -> Result<Self, TaskValidationError> {
        let task = Self {
            id,
            title: normalize_title(&draft.title),
            description: normalize_description(draft.description.as_deref()),
            status: TaskStatus::Open,
            priority: draft.priority,
            due_at: draft.due_at,
            tags: normalize_tags(&draft.tags)?,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
            parent_id: None,
            carried_over: false,
        };
        task.validate()?;
        Ok(task)
    }

    /// Returns the task that results from applying `patch` at time `now`.
    ///
    /// `self` is left untouched. The result carries `version + 1` and an
    /// `updated_at` that never moves backwards.
    pub fn apply_patch(&self, patch: &TaskPatch, now: i64) -> Result<Self, TaskValidationError> {
        let mut next = self.next_revision(now);

        if let Some(title) = patch.title.as_deref() {
            next.title = normalize_title(title);
        }
        if let Some(description) = patch.description.as_ref() {
            next.description = normalize_description(description.as_deref());
        }
        if let Some(priority) = patch.priority {
            next.priority = priority;
        }
        if let Some(due_at) = patch.due_at {
            next.due_at = due_at;
        }
        if let Some(tags) = patch.tags.as_ref() {
            next.tags = normalize_tags(tags)?;
        }
        if let Some(status) = patch.status {
            if !can_transition(self.status, status) {
                return Err(TaskValidationError::IllegalTransition {
                    from: self.status,
                    to: status,
                });
            }
            next.status = status;
        }

        if next.status == TaskStatus::Done && next.completed_at.is_none() {
            next.completed_at = Some(next.updated_at);
        }

        next.validate()?;
        Ok(next)
    }

    /// Copy with `version + 1` and `updated_at = max(now, updated_at)`.
    ///
    /// Base for every repository-driven change, including ones that carry no
    /// caller patch (promotion to top level, carry-over marking).
    pub fn next_revision(&self, now: i64) -> Self {
        let mut next = self.clone();
        next.updated_at = now.max(self.updated_at);
        next.version = self.version.saturating_add(1);
        next
    }

    /// Checks all field invariants.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if self.id.is_nil() {
            return Err(TaskValidationError::NilId);
        }

        if self.title.trim().is_empty() {
            return Err(TaskValidationError::EmptyTitle);
        }
        let title_chars = self.title.chars().count();
        if title_chars > TITLE_MAX_CHARS {
            return Err(TaskValidationError::TitleTooLong {
                chars: title_chars,
                max: TITLE_MAX_CHARS,
            });
        }

        if let Some(description) = self.description.as_deref() {
            let chars = description.chars().count();
            if chars > DESCRIPTION_MAX_CHARS {
                return Err(TaskValidationError::DescriptionTooLong {
                    chars,
                    max: DESCRIPTION_MAX_CHARS,
                });
            }
        }

        for tag in &self.tags {
            if !is_valid_tag(tag) {
                return Err(TaskValidationError::InvalidTag(tag.clone()));
            }
        }

        if self.updated_at < self.created_at {
            return Err(TaskValidationError::UpdatedBeforeCreated {
                created_at: self.created_at,
                updated_at: self.updated_at,
            });
        }
        if let Some(completed_at) = self.completed_at {
            if completed_at < self.created_at {
                return Err(TaskValidationError::CompletedBeforeCreated {
                    created_at: self.created_at,
                    completed_at,
                });
            }
        }

        if self.parent_id == Some(self.id) {
            return Err(TaskValidationError::SelfParent);
        }

        Ok(())
    }

    pub fn is_archived(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Open` or `InProgress`.
    pub fn is_unfinished(&self) -> bool {
        matches!(self.status, TaskStatus::Open | TaskStatus::InProgress)
    }

    pub fn is_subtask(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// Caller input for task creation. Identity and timestamps are never taken
/// from the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub due_at: Option<i64>,
    pub tags: Vec<String>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_due_at(mut self, due_at: i64) -> Self {
        self.due_at = Some(due_at);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Partial update. `None` leaves a field unchanged; for clearable fields
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub due_at: Option<Option<i64>>,
    pub tags: Option<Vec<String>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn due_at(mut self, due_at: Option<i64>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }
}

/// Trims and collapses internal whitespace runs to one space.
pub fn normalize_title(title: &str) -> String {
    WHITESPACE_RE.replace_all(title.trim(), " ").into_owned()
}

/// Trims description text; blank text becomes `None`.
pub fn normalize_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Normalizes one tag value (trim + lowercase). Blank input yields `None`.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes, deduplicates and validates tag labels.
pub fn normalize_tags(tags: &[String]) -> Result<BTreeSet<String>, TaskValidationError> {
    let mut unique = BTreeSet::new();
    for tag in tags {
        let Some(value) = normalize_tag(tag) else {
            continue;
        };
        if !is_valid_tag(&value) {
            return Err(TaskValidationError::InvalidTag(value));
        }
        unique.insert(value);
    }
    Ok(unique)
}

fn is_valid_tag(tag: &str) -> bool {
    tag.chars().count() <= TAG_MAX_CHARS && TAG_RE.is_match(tag)
}

// Deserialization goes through this mirror so decoded tasks are validated.
#[derive(Deserialize)]
struct RawTask {
    id: TaskId,
    title: String,
    description: Option<String>,
    status: TaskStatus,
    priority: Priority,
    due_at: Option<i64>,
    #[serde(default)]
    tags: BTreeSet<String>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
    version: u64,
    #[serde(default)]
    parent_id: Option<TaskId>,
    #[serde(default)]
    carried_over: bool,
}

impl TryFrom<RawTask> for Task {
    type Error = TaskValidationError;

    fn try_from(raw: RawTask) -> Result<Self, Self::Error> {
        let task = Self {
            id: raw.id,
            title: raw.title,
            description: raw.description,
            status: raw.status,
            priority: raw.priority,
            due_at: raw.due_at,
            tags: raw.tags,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            completed_at: raw.completed_at,
            version: raw.version,
            parent_id: raw.parent_id,
            carried_over: raw.carried_over,
        };
        task.validate()?;
        Ok(task)
    }
}
