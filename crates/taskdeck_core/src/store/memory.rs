//! Volatile task store.
//!
//! Mirrors [`SqliteTaskStore`](super::SqliteTaskStore) semantics without
//! durability: version checks, duplicate detection and all-or-nothing
//! batches behave the same.

use crate::model::task::{Task, TaskId};
use crate::store::{StorageError, StorageResult, TaskStore, WriteBatch};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: HashMap<TaskId, Task>,
    settings: BTreeMap<String, String>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with pre-existing tasks, e.g. to simulate a prior run.
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: tasks.into_iter().map(|task| (task.id, task)).collect(),
            settings: BTreeMap::new(),
        }
    }
}

impl TaskStore for MemoryTaskStore {
    fn migrate(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn insert(&mut self, task: &Task) -> StorageResult<()> {
        insert_into(&mut self.tasks, task)
    }

    fn update(&mut self, task: &Task, expected_version: u64) -> StorageResult<()> {
        update_in(&mut self.tasks, task, expected_version)
    }

    fn delete(&mut self, id: TaskId) -> StorageResult<()> {
        delete_from(&mut self.tasks, id)
    }

    fn apply_batch(&mut self, batch: &WriteBatch) -> StorageResult<()> {
        // Staged on a copy so a failing step leaves the live map untouched.
        let mut staged = self.tasks.clone();
        for task in &batch.inserts {
            insert_into(&mut staged, task)?;
        }
        for (task, expected_version) in &batch.updates {
            update_in(&mut staged, task, *expected_version)?;
        }
        for id in &batch.deletes {
            delete_from(&mut staged, *id)?;
        }
        self.tasks = staged;
        Ok(())
    }

    fn load_all(&self) -> StorageResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    fn load_setting(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.settings.get(key).cloned())
    }

    fn save_setting(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn close(self) -> StorageResult<()> {
        Ok(())
    }
}

fn insert_into(tasks: &mut HashMap<TaskId, Task>, task: &Task) -> StorageResult<()> {
    if tasks.contains_key(&task.id) {
        return Err(StorageError::AlreadyExists(task.id));
    }
    tasks.insert(task.id, task.clone());
    Ok(())
}

fn update_in(
    tasks: &mut HashMap<TaskId, Task>,
    task: &Task,
    expected_version: u64,
) -> StorageResult<()> {
    if expected_version.checked_add(1) != Some(task.version) {
        return Err(StorageError::InvalidData(format!(
            "task {} version {} does not follow expected version {expected_version}",
            task.id, task.version
        )));
    }

    let stored = tasks
        .get_mut(&task.id)
        .ok_or(StorageError::NotFound(task.id))?;
    if stored.version != expected_version {
        return Err(StorageError::Conflict {
            id: task.id,
            expected: expected_version,
            actual: stored.version,
        });
    }
    *stored = task.clone();
    Ok(())
}

fn delete_from(tasks: &mut HashMap<TaskId, Task>, id: TaskId) -> StorageResult<()> {
    tasks
        .remove(&id)
        .map(|_| ())
        .ok_or(StorageError::NotFound(id))
}

#[cfg(test)]
mod tests {
    use super::MemoryTaskStore;
    use crate::model::task::{Task, TaskDraft};
    use crate::store::{StorageError, TaskStore, WriteBatch};
    use uuid::Uuid;

    #[test]
    fn batch_is_all_or_nothing() {
        let mut store = MemoryTaskStore::new();
        let kept = Task::from_draft(Uuid::new_v4(), &TaskDraft::new("kept"), 1).unwrap();
        store.insert(&kept).unwrap();

        let fresh = Task::from_draft(Uuid::new_v4(), &TaskDraft::new("fresh"), 2).unwrap();
        let mut marked = kept.next_revision(3);
        marked.carried_over = true;
        let missing = Uuid::new_v4();
        let mut batch = WriteBatch::new();
        batch.insert(fresh).update(marked, 0).delete(missing);

        let err = store.apply_batch(&batch).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(id) if id == missing));
        assert_eq!(store.load_all().unwrap(), vec![kept]);
    }

    #[test]
    fn stale_update_reports_stored_version() {
        let mut store = MemoryTaskStore::new();
        let task = Task::from_draft(Uuid::new_v4(), &TaskDraft::new("v0"), 1).unwrap();
        store.insert(&task).unwrap();

        let mut next = task.clone();
        next.version = 1;
        store.update(&next, 0).unwrap();

        let err = store.update(&next, 0).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Conflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }
}
