//! Authoritative in-memory task repository.
//!
//! # Responsibility
//! - Own the cached task set and expose CRUD/query entry points.
//! - Validate before persisting and persist before touching the cache.
//! - Publish change events once cache and store agree.
//!
//! # Invariants
//! - One mutation at a time; queued writers proceed in arrival order.
//! - Readers are locked out while a mutation writes store and cache, so
//!   no reader sees a half-applied change.
//! - A failed store write leaves the cache untouched.
//! - The writer slot is released fairly on success and failure alike.
//! - Subtasks hang off top-level tasks; a removed parent never leaves
//!   dangling children behind.
//! - Every lock wait is bounded by the configured timeout.
//! - Observers must not call mutating operations; doing so fails fast with
//!   [`RepoError::Reentrancy`].

use crate::clock::{Clock, SystemClock};
use crate::config::DEFAULT_STORAGE_TIMEOUT_MS;
use crate::model::task::{Task, TaskDraft, TaskId, TaskPatch, TaskStatus, TaskValidationError};
use crate::notify::{ChangeNotifier, TaskEvent};
use crate::query::filter::{view, TaskCriteria};
use crate::store::{duration_ms, StorageError, TaskStore, WriteBatch};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use uuid::Uuid;

/// Preference key for the presentation theme.
pub const THEME_SETTING_KEY: &str = "theme";
/// Theme reported when none has been stored.
pub const DEFAULT_THEME: &str = "theme-dark";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository operation failure.
#[derive(Debug)]
pub enum RepoError {
    Validation(TaskValidationError),
    NotFound(TaskId),
    /// Caller's expected version is stale; re-read and resubmit.
    Conflict {
        id: TaskId,
        expected: u64,
        actual: u64,
    },
    /// Operation is not legal for the task's current status.
    InvalidState {
        id: TaskId,
        status: TaskStatus,
        operation: &'static str,
    },
    Storage(StorageError),
    /// A mutating call was made from inside change delivery.
    Reentrancy { operation: &'static str },
    /// Carry-over window is empty, reversed or not yet over.
    InvalidWindow { start: i64, end: i64 },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "task not found: {id}"),
            Self::Conflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "stale write on task {id}: expected version {expected}, current {actual}"
            ),
            Self::InvalidState {
                id,
                status,
                operation,
            } => write!(f, "cannot {operation} task {id} while {status}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::Reentrancy { operation } => write!(
                f,
                "reentrant `{operation}` from a change observer is not allowed"
            ),
            Self::InvalidWindow { start, end } => {
                write!(f, "invalid carry-over window [{start}, {end})")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TaskValidationError> for RepoError {
    fn from(value: TaskValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StorageError> for RepoError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Conflict {
                id,
                expected,
                actual,
            } => Self::Conflict {
                id,
                expected,
                actual,
            },
            StorageError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

/// Construction options for [`TaskRepository`].
#[derive(Clone)]
pub struct RepositoryOptions {
    /// Upper bound for every lock wait.
    pub timeout: Duration,
    /// Source of `created_at`/`updated_at`.
    pub clock: Arc<dyn Clock>,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_STORAGE_TIMEOUT_MS),
            clock: Arc::new(SystemClock),
        }
    }
}

impl RepositoryOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Task repository over a pluggable [`TaskStore`].
pub struct TaskRepository<S: TaskStore> {
    // Held for the whole mutation including delivery, so events leave in
    // commit order.
    writer: Mutex<S>,
    cache: RwLock<HashMap<TaskId, Task>>,
    notifier: Arc<ChangeNotifier>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    delivering: Mutex<Option<ThreadId>>,
    queued: AtomicUsize,
}

impl<S: TaskStore> TaskRepository<S> {
    /// Migrates `store`, loads every task and returns a ready repository.
    ///
    /// Any failure is fatal: callers must not start with an unreadable store.
    pub fn open(store: S, notifier: Arc<ChangeNotifier>) -> RepoResult<Self> {
        Self::open_with(store, notifier, RepositoryOptions::default())
    }

    /// Like [`TaskRepository::open`] with explicit timeout and clock.
    pub fn open_with(
        mut store: S,
        notifier: Arc<ChangeNotifier>,
        options: RepositoryOptions,
    ) -> RepoResult<Self> {
        let loaded = store.migrate().and_then(|()| store.load_all());
        let tasks = match loaded {
            Ok(tasks) => tasks,
            Err(err) => {
                error!("event=repo_open module=repo status=error error={err}");
                return Err(RepoError::Storage(err));
            }
        };

        let mut cache: HashMap<TaskId, Task> =
            tasks.into_iter().map(|task| (task.id, task)).collect();

        let repairs = orphan_repairs(&cache, options.clock.now_ms());
        if !repairs.is_empty() {
            if let Err(err) = store.apply_batch(&repairs) {
                error!("event=repo_open module=repo status=error op=promote_orphans error={err}");
                return Err(RepoError::Storage(err));
            }
            apply_to_cache(&mut cache, &repairs);
            warn!(
                "event=repo_open module=repo status=repaired promoted_orphans={}",
                repairs.len()
            );
        }

        info!(
            "event=repo_open module=repo status=ok count={} timeout_ms={}",
            cache.len(),
            duration_ms(options.timeout)
        );

        Ok(Self {
            writer: Mutex::new(store),
            cache: RwLock::new(cache),
            notifier,
            clock: options.clock,
            timeout: options.timeout,
            delivering: Mutex::new(None),
            queued: AtomicUsize::new(0),
        })
    }

    /// Creates an `Open` task from `draft`.
    ///
    /// # Contract
    /// - Assigns id, `created_at == updated_at` and `version == 0`.
    /// - Validation failures return before any storage attempt.
    /// - Emits [`TaskEvent::Created`] after commit.
    pub fn create(&self, draft: TaskDraft) -> RepoResult<Task> {
        self.mutate("create", |store, cache| {
            let task = Task::from_draft(Uuid::new_v4(), &draft, self.clock.now_ms())?;
            store.insert(&task)?;
            cache.insert(task.id, task.clone());
            Ok((task.clone(), vec![TaskEvent::Created(task)]))
        })
    }

    /// Creates an `Open` subtask under the top-level task `parent_id`.
    ///
    /// # Contract
    /// - Unknown parent yields `NotFound`.
    /// - A parent that is itself a subtask yields
    ///   `Validation(NestedSubtask)`; an archived parent yields `InvalidState`.
    /// - Emits [`TaskEvent::Created`] after commit.
    pub fn create_subtask(&self, parent_id: TaskId, draft: TaskDraft) -> RepoResult<Task> {
        self.mutate("create_subtask", |store, cache| {
            let parent = cache
                .get(&parent_id)
                .ok_or(RepoError::NotFound(parent_id))?;
            if parent.is_subtask() {
                return Err(TaskValidationError::NestedSubtask { parent: parent_id }.into());
            }
            if parent.is_archived() {
                return Err(RepoError::InvalidState {
                    id: parent_id,
                    status: parent.status,
                    operation: "create_subtask",
                });
            }

            let mut task = Task::from_draft(Uuid::new_v4(), &draft, self.clock.now_ms())?;
            task.parent_id = Some(parent_id);
            task.validate()?;

            store.insert(&task)?;
            cache.insert(task.id, task.clone());
            Ok((task.clone(), vec![TaskEvent::Created(task)]))
        })
    }

    /// Applies `patch` to task `id` if its stored version is `expected_version`.
    ///
    /// # Contract
    /// - Status changes must follow the lifecycle graph.
    /// - Archived tasks accept no edits (`InvalidState`).
    /// - A stale `expected_version` yields `Conflict`; nothing is retried.
    /// - Emits [`TaskEvent::Updated`] after commit.
    pub fn update(&self, id: TaskId, patch: TaskPatch, expected_version: u64) -> RepoResult<Task> {
        self.mutate("update", |store, cache| {
            let current = cache.get(&id).ok_or(RepoError::NotFound(id))?;

            let leaves_status_alone = patch.status.map_or(true, |status| status == current.status);
            if current.is_archived() && leaves_status_alone {
                return Err(RepoError::InvalidState {
                    id,
                    status: current.status,
                    operation: "update",
                });
            }

            let mut next = current.apply_patch(&patch, self.clock.now_ms())?;
            // The store decides staleness; the candidate carries the version
            // the caller's write would produce.
            next.version = expected_version
                .checked_add(1)
                .ok_or(RepoError::Conflict {
                    id,
                    expected: expected_version,
                    actual: current.version,
                })?;

            store.update(&next, expected_version)?;
            cache.insert(id, next.clone());
            Ok((next.clone(), vec![TaskEvent::Updated(next)]))
        })
    }

    /// Physically removes an `Archived` task.
    ///
    /// Any other status yields `InvalidState`. Archived subtasks go with it;
    /// its other subtasks become top-level tasks. Emits
    /// [`TaskEvent::Updated`] per promoted subtask and [`TaskEvent::Deleted`]
    /// per removed task.
    pub fn remove(&self, id: TaskId) -> RepoResult<()> {
        self.mutate("remove", |store, cache| {
            let current = cache.get(&id).ok_or(RepoError::NotFound(id))?;
            if !current.is_archived() {
                return Err(RepoError::InvalidState {
                    id,
                    status: current.status,
                    operation: "remove",
                });
            }

            let (batch, _) = removal_batch(cache, &[id], self.clock.now_ms());
            if batch.len() == 1 {
                store.delete(id)?;
            } else {
                store.apply_batch(&batch)?;
            }
            apply_to_cache(cache, &batch);
            Ok(((), batch_events(&batch)))
        })
    }

    /// Removes every task archived for longer than `retention`.
    ///
    /// All selected tasks, their archived subtasks and the promotion of their
    /// other subtasks go in one store transaction. Returns the deleted ids
    /// oldest first.
    pub fn purge_archived(&self, retention: Duration) -> RepoResult<Vec<TaskId>> {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);

        self.mutate("purge", |store, cache| {
            let now = self.clock.now_ms();
            let cutoff = now.saturating_sub(retention_ms);
            let expired: Vec<TaskId> = cache
                .values()
                .filter(|task| task.is_archived() && task.updated_at < cutoff)
                .map(|task| task.id)
                .collect();

            let (batch, purged) = removal_batch(cache, &expired, now);
            if !batch.is_empty() {
                store.apply_batch(&batch)?;
                apply_to_cache(cache, &batch);
            }

            info!(
                "event=task_purge module=repo status=ok count={} promoted={} cutoff_ms={}",
                purged.len(),
                batch.updates.len(),
                cutoff
            );
            Ok((purged, batch_events(&batch)))
        })
    }

    /// Copies unfinished top-level tasks created in `[day_start, day_end)`
    /// forward as fresh `Open` tasks.
    ///
    /// # Contract
    /// - `day_start < day_end <= now`, else `InvalidWindow`.
    /// - Each source is marked `carried_over` and never copied again.
    /// - Unfinished subtasks are copied under the new parent.
    /// - Sources and copies commit in one store transaction. Emits
    ///   [`TaskEvent::Created`] per copy and [`TaskEvent::Updated`] per source.
    /// - Returns the copies, parents before their subtasks.
    pub fn carry_over(&self, day_start: i64, day_end: i64) -> RepoResult<Vec<Task>> {
        let now = self.clock.now_ms();
        if day_start >= day_end || day_end > now {
            warn!(
                "event=task_carry_over module=repo status=rejected start_ms={day_start} end_ms={day_end} now_ms={now}"
            );
            return Err(RepoError::InvalidWindow {
                start: day_start,
                end: day_end,
            });
        }

        self.mutate("carry_over", |store, cache| {
            let mut sources: Vec<&Task> = cache
                .values()
                .filter(|task| {
                    !task.is_subtask()
                        && task.is_unfinished()
                        && !task.carried_over
                        && (day_start..day_end).contains(&task.created_at)
                })
                .collect();
            sources.sort_by_key(|task| (task.created_at, task.id));

            let mut batch = WriteBatch::new();
            for source in sources {
                let copy = carried_copy(source, None, now)?;
                let mut children: Vec<&Task> = cache
                    .values()
                    .filter(|task| {
                        task.parent_id == Some(source.id)
                            && task.is_unfinished()
                            && !task.carried_over
                    })
                    .collect();
                children.sort_by_key(|task| (task.created_at, task.id));

                batch.insert(copy.clone());
                batch.update(carried_mark(source, now), source.version);
                for child in children {
                    batch.insert(carried_copy(child, Some(copy.id), now)?);
                    batch.update(carried_mark(child, now), child.version);
                }
            }

            if !batch.is_empty() {
                store.apply_batch(&batch)?;
                apply_to_cache(cache, &batch);
            }
            info!(
                "event=task_carry_over module=repo status=ok copied={} start_ms={day_start} end_ms={day_end}",
                batch.inserts.len()
            );
            Ok((batch.inserts.clone(), batch_events(&batch)))
        })
    }

    /// Returns a copy of task `id`.
    pub fn get(&self, id: TaskId) -> RepoResult<Task> {
        self.read_cache("get")?
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound(id))
    }

    /// Returns a snapshot of every task ordered by `created_at`, then `id`.
    pub fn list(&self) -> RepoResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self.read_cache("list")?.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// Runs [`view`] over a consistent snapshot.
    pub fn query(&self, criteria: &TaskCriteria) -> RepoResult<Vec<Task>> {
        let snapshot = self.list()?;
        Ok(view(&snapshot, criteria))
    }

    /// Reads a stored preference.
    pub fn setting(&self, key: &str) -> RepoResult<Option<String>> {
        let store = self.lock_store("setting")?;
        let value = store.load_setting(key);
        MutexGuard::unlock_fair(store);
        Ok(value?)
    }

    /// Stores a preference. Preferences do not produce task events.
    pub fn set_setting(&self, key: &str, value: &str) -> RepoResult<()> {
        let mut store = self.lock_store("set_setting")?;
        let saved = store.save_setting(key, value);
        MutexGuard::unlock_fair(store);
        Ok(saved?)
    }

    /// Returns the stored theme or [`DEFAULT_THEME`].
    pub fn theme(&self) -> RepoResult<String> {
        Ok(self
            .setting(THEME_SETTING_KEY)?
            .unwrap_or_else(|| DEFAULT_THEME.to_string()))
    }

    pub fn set_theme(&self, theme: &str) -> RepoResult<()> {
        self.set_setting(THEME_SETTING_KEY, theme)
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Number of calls currently waiting for the writer slot.
    pub fn queued_writers(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Closes the store cleanly. Consumes the repository.
    pub fn shutdown(self) -> RepoResult<()> {
        let count = self.cache.read().len();
        let store = self.writer.into_inner();
        store.close()?;
        info!("event=repo_shutdown module=repo status=ok count={count}");
        Ok(())
    }

    fn lock_store(&self, operation: &'static str) -> RepoResult<MutexGuard<'_, S>> {
        if *self.delivering.lock() == Some(thread::current().id()) {
            error!("event=repo_reentrancy module=repo status=error op={operation}");
            return Err(RepoError::Reentrancy { operation });
        }
        self.queued.fetch_add(1, Ordering::SeqCst);
        let store = self.writer.try_lock_for(self.timeout);
        self.queued.fetch_sub(1, Ordering::SeqCst);
        store.ok_or_else(|| self.lock_timeout(operation))
    }

    // Runs one mutation in the writer slot. `body` sees the store and the
    // write-locked cache; its events are delivered after the cache lock is
    // gone. The slot is handed on fairly whatever the outcome.
    fn mutate<T>(
        &self,
        operation: &'static str,
        body: impl FnOnce(&mut S, &mut HashMap<TaskId, Task>) -> RepoResult<(T, Vec<TaskEvent>)>,
    ) -> RepoResult<T> {
        let mut store = self.lock_store(operation)?;
        let outcome = self
            .write_cache(operation)
            .and_then(|mut cache| body(&mut *store, &mut *cache));

        match outcome {
            Ok((value, events)) => {
                self.deliver(operation, &events);
                MutexGuard::unlock_fair(store);
                Ok(value)
            }
            Err(err) => {
                MutexGuard::unlock_fair(store);
                debug!("event=repo_write module=repo status=rejected op={operation} error={err}");
                Err(err)
            }
        }
    }

    fn write_cache(
        &self,
        operation: &'static str,
    ) -> RepoResult<RwLockWriteGuard<'_, HashMap<TaskId, Task>>> {
        self.cache
            .try_write_for(self.timeout)
            .ok_or_else(|| self.lock_timeout(operation))
    }

    fn read_cache(
        &self,
        operation: &'static str,
    ) -> RepoResult<RwLockReadGuard<'_, HashMap<TaskId, Task>>> {
        self.cache
            .try_read_for(self.timeout)
            .ok_or_else(|| self.lock_timeout(operation))
    }

    fn lock_timeout(&self, operation: &'static str) -> RepoError {
        let timeout_ms = duration_ms(self.timeout);
        warn!("event=repo_lock module=repo status=timeout op={operation} timeout_ms={timeout_ms}");
        RepoError::Storage(StorageError::Timeout {
            operation,
            timeout_ms,
        })
    }

    fn deliver(&self, operation: &'static str, events: &[TaskEvent]) {
        *self.delivering.lock() = Some(thread::current().id());
        for event in events {
            let report = self.notifier.publish(event);
            debug!(
                "event=task_{} module=repo status=ok op={operation} task_id={} delivered={} failed={}",
                event.kind().as_str(),
                event.task_id(),
                report.delivered,
                report.failed
            );
        }
        *self.delivering.lock() = None;
    }
}

// Promotes subtasks whose parent is missing or is itself a subtask.
fn orphan_repairs(cache: &HashMap<TaskId, Task>, now: i64) -> WriteBatch {
    let mut orphans: Vec<&Task> = cache
        .values()
        .filter(|task| {
            task.parent_id
                .is_some_and(|parent| cache.get(&parent).map_or(true, Task::is_subtask))
        })
        .collect();
    orphans.sort_by_key(|task| (task.created_at, task.id));

    let mut batch = WriteBatch::new();
    for orphan in orphans {
        batch.update(promoted(orphan, now), orphan.version);
    }
    batch
}

// Deletes `roots` with their archived subtasks and promotes the rest of
// their subtasks. Also returns the deleted ids oldest first.
fn removal_batch(
    cache: &HashMap<TaskId, Task>,
    roots: &[TaskId],
    now: i64,
) -> (WriteBatch, Vec<TaskId>) {
    let root_set: HashSet<TaskId> = roots.iter().copied().collect();
    let mut children: Vec<&Task> = cache
        .values()
        .filter(|task| {
            !root_set.contains(&task.id)
                && task.parent_id.is_some_and(|parent| root_set.contains(&parent))
        })
        .collect();
    children.sort_by_key(|task| (task.created_at, task.id));

    let mut batch = WriteBatch::new();
    let mut doomed: Vec<(i64, TaskId)> = Vec::new();
    for child in children {
        if child.is_archived() {
            doomed.push((child.updated_at, child.id));
        } else {
            batch.update(promoted(child, now), child.version);
        }
    }
    doomed.extend(
        roots
            .iter()
            .filter_map(|id| cache.get(id))
            .map(|task| (task.updated_at, task.id)),
    );
    doomed.sort_unstable();

    let deleted: Vec<TaskId> = doomed.into_iter().map(|(_, id)| id).collect();
    for id in &deleted {
        batch.delete(*id);
    }
    (batch, deleted)
}

fn promoted(task: &Task, now: i64) -> Task {
    let mut next = task.next_revision(now);
    next.parent_id = None;
    next
}

fn carried_mark(task: &Task, now: i64) -> Task {
    let mut next = task.next_revision(now);
    next.carried_over = true;
    next
}

fn carried_copy(
    source: &Task,
    parent_id: Option<TaskId>,
    now: i64,
) -> Result<Task, TaskValidationError> {
    let draft = TaskDraft {
        title: source.title.clone(),
        description: source.description.clone(),
        priority: source.priority,
        due_at: source.due_at,
        tags: source.tags.iter().cloned().collect(),
    };
    let mut copy = Task::from_draft(Uuid::new_v4(), &draft, now)?;
    copy.parent_id = parent_id;
    Ok(copy)
}

fn apply_to_cache(cache: &mut HashMap<TaskId, Task>, batch: &WriteBatch) {
    for task in &batch.inserts {
        cache.insert(task.id, task.clone());
    }
    for (task, _) in &batch.updates {
        cache.insert(task.id, task.clone());
    }
    for id in &batch.deletes {
        cache.remove(id);
    }
}

// One event per row, in the order the batch applies them.
fn batch_events(batch: &WriteBatch) -> Vec<TaskEvent> {
    let created = batch.inserts.iter().cloned().map(TaskEvent::Created);
    let updated = batch
        .updates
        .iter()
        .map(|(task, _)| TaskEvent::Updated(task.clone()));
    let deleted = batch.deletes.iter().copied().map(TaskEvent::Deleted);
    created.chain(updated).chain(deleted).collect()
}
