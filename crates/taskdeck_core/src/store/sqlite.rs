//! SQLite-backed task store.
//!
//! # Responsibility
//! - Map `Task` values onto `tasks` and `task_tags` rows.
//! - Run each write in one IMMEDIATE transaction.
//!
//! # Invariants
//! - Version checks and row writes happen inside the same transaction.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Busy/locked waits are bounded by the configured timeout.

use crate::db::migrations::apply_migrations;
use crate::db::{open_connection, open_connection_in_memory};
use crate::model::task::{Priority, Task, TaskId, TaskStatus};
use crate::store::{duration_ms, StorageError, StorageResult, TaskStore, WriteBatch};
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::{Duration, Instant};
use uuid::Uuid;

const TASK_SELECT_SQL: &str = "SELECT
    id,
    title,
    description,
    status,
    priority,
    due_at,
    created_at,
    updated_at,
    completed_at,
    version,
    parent_id,
    carried_over
FROM tasks";

/// Task store over one owned SQLite connection.
pub struct SqliteTaskStore {
    conn: Connection,
    timeout: Duration,
}

impl SqliteTaskStore {
    /// Opens (or creates) the store file at `path`.
    ///
    /// The schema is not touched; call [`TaskStore::migrate`] before use.
    pub fn open(path: impl AsRef<Path>, timeout: Duration) -> StorageResult<Self> {
        let conn = open_connection(path, timeout)?;
        Ok(Self { conn, timeout })
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory(timeout: Duration) -> StorageResult<Self> {
        let conn = open_connection_in_memory(timeout)?;
        Ok(Self { conn, timeout })
    }

    fn write<T>(
        &mut self,
        operation: &'static str,
        body: impl FnOnce(&Transaction<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let timeout = self.timeout;
        let started_at = Instant::now();
        let result = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)
            .and_then(|tx| {
                let value = body(&tx)?;
                tx.commit()?;
                Ok(value)
            })
            .map_err(|err| err.busy_as_timeout(operation, timeout));

        match &result {
            Ok(_) => info!(
                "event=store_write module=store status=ok op={operation} duration_ms={}",
                started_at.elapsed().as_millis()
            ),
            Err(StorageError::Conflict { .. } | StorageError::NotFound(_)) => warn!(
                "event=store_write module=store status=rejected op={operation} duration_ms={}",
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=store_write module=store status=error op={operation} duration_ms={} timeout_ms={} error={}",
                started_at.elapsed().as_millis(),
                duration_ms(timeout),
                err
            ),
        }
        result
    }
}

impl TaskStore for SqliteTaskStore {
    fn migrate(&mut self) -> StorageResult<()> {
        let timeout = self.timeout;
        let outcome = apply_migrations(&mut self.conn)
            .map_err(|err| StorageError::from(err).busy_as_timeout("migrate", timeout))?;
        info!(
            "event=store_migrate module=store status=ok from_version={} to_version={} applied={}",
            outcome.from_version,
            outcome.to_version,
            outcome.applied_any()
        );
        Ok(())
    }

    fn insert(&mut self, task: &Task) -> StorageResult<()> {
        self.write("insert", |tx| insert_row(tx, task))
    }

    fn update(&mut self, task: &Task, expected_version: u64) -> StorageResult<()> {
        check_version_step(task, expected_version)?;
        self.write("update", |tx| update_row(tx, task, expected_version))
    }

    fn delete(&mut self, id: TaskId) -> StorageResult<()> {
        self.write("delete", |tx| delete_row(tx, id))
    }

    fn apply_batch(&mut self, batch: &WriteBatch) -> StorageResult<()> {
        for (task, expected_version) in &batch.updates {
            check_version_step(task, *expected_version)?;
        }

        self.write("apply_batch", |tx| {
            for task in &batch.inserts {
                insert_row(tx, task)?;
            }
            for (task, expected_version) in &batch.updates {
                update_row(tx, task, *expected_version)?;
            }
            for id in &batch.deletes {
                delete_row(tx, *id)?;
            }
            Ok(())
        })
    }

    fn load_all(&self) -> StorageResult<Vec<Task>> {
        let started_at = Instant::now();
        let tasks = self
            .read_all_tasks()
            .map_err(|err| err.busy_as_timeout("load_all", self.timeout))?;

        info!(
            "event=store_load module=store status=ok count={} duration_ms={}",
            tasks.len(),
            started_at.elapsed().as_millis()
        );
        Ok(tasks)
    }

    fn load_setting(&self, key: &str) -> StorageResult<Option<String>> {
        self.conn
            .query_row("SELECT value FROM settings WHERE key = ?1;", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|err| StorageError::from(err).busy_as_timeout("load_setting", self.timeout))
    }

    fn save_setting(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.write("save_setting", |tx| {
            tx.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = (strftime('%s', 'now') * 1000);",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn close(self) -> StorageResult<()> {
        match self.conn.close() {
            Ok(()) => {
                info!("event=db_close module=store status=ok");
                Ok(())
            }
            Err((_conn, err)) => {
                error!("event=db_close module=store status=error error={err}");
                Err(err.into())
            }
        }
    }
}

impl SqliteTaskStore {
    fn read_all_tasks(&self) -> StorageResult<Vec<Task>> {
        let mut tags_by_task = load_all_tags(&self.conn)?;

        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT_SQL} ORDER BY created_at ASC, id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            let mut task = parse_task_row(row)?;
            if let Some(tags) = tags_by_task.remove(&task.id) {
                task.tags = tags;
            }
            task.validate().map_err(|err| {
                StorageError::InvalidData(format!("task {} failed validation: {err}", task.id))
            })?;
            tasks.push(task);
        }
        Ok(tasks)
    }
}

fn check_version_step(task: &Task, expected_version: u64) -> StorageResult<()> {
    if expected_version.checked_add(1) != Some(task.version) {
        return Err(StorageError::InvalidData(format!(
            "task {} version {} does not follow expected version {expected_version}",
            task.id, task.version
        )));
    }
    Ok(())
}

fn insert_row(tx: &Transaction<'_>, task: &Task) -> StorageResult<()> {
    if stored_version(tx, task.id)?.is_some() {
        return Err(StorageError::AlreadyExists(task.id));
    }

    tx.execute(
        "INSERT INTO tasks (
            id,
            title,
            description,
            status,
            priority,
            due_at,
            created_at,
            updated_at,
            completed_at,
            version,
            parent_id,
            carried_over
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);",
        params![
            task.id.to_string(),
            task.title.as_str(),
            task.description.as_deref(),
            task.status.as_str(),
            task.priority.as_str(),
            task.due_at,
            task.created_at,
            task.updated_at,
            task.completed_at,
            version_to_db(task.version)?,
            task.parent_id.map(|id| id.to_string()),
            task.carried_over,
        ],
    )?;
    insert_tags(tx, task)
}

fn update_row(tx: &Transaction<'_>, task: &Task, expected_version: u64) -> StorageResult<()> {
    let changed = tx.execute(
        "UPDATE tasks
         SET
            title = ?1,
            description = ?2,
            status = ?3,
            priority = ?4,
            due_at = ?5,
            updated_at = ?6,
            completed_at = ?7,
            version = ?8,
            parent_id = ?9,
            carried_over = ?10
         WHERE id = ?11
           AND version = ?12;",
        params![
            task.title.as_str(),
            task.description.as_deref(),
            task.status.as_str(),
            task.priority.as_str(),
            task.due_at,
            task.updated_at,
            task.completed_at,
            version_to_db(task.version)?,
            task.parent_id.map(|id| id.to_string()),
            task.carried_over,
            task.id.to_string(),
            version_to_db(expected_version)?,
        ],
    )?;

    if changed == 0 {
        return Err(match stored_version(tx, task.id)? {
            Some(actual) => StorageError::Conflict {
                id: task.id,
                expected: expected_version,
                actual,
            },
            None => StorageError::NotFound(task.id),
        });
    }

    tx.execute(
        "DELETE FROM task_tags WHERE task_id = ?1;",
        [task.id.to_string()],
    )?;
    insert_tags(tx, task)
}

fn delete_row(tx: &Transaction<'_>, id: TaskId) -> StorageResult<()> {
    // task_tags rows follow through ON DELETE CASCADE.
    let changed = tx.execute("DELETE FROM tasks WHERE id = ?1;", [id.to_string()])?;
    if changed == 0 {
        return Err(StorageError::NotFound(id));
    }
    Ok(())
}

fn insert_tags(tx: &Transaction<'_>, task: &Task) -> StorageResult<()> {
    let id = task.id.to_string();
    let mut stmt = tx.prepare_cached("INSERT INTO task_tags (task_id, tag) VALUES (?1, ?2);")?;
    for tag in &task.tags {
        stmt.execute(params![id.as_str(), tag.as_str()])?;
    }
    Ok(())
}

fn stored_version(conn: &Connection, id: TaskId) -> StorageResult<Option<u64>> {
    let value: Option<i64> = conn
        .query_row(
            "SELECT version FROM tasks WHERE id = ?1;",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    value.map(version_from_db).transpose()
}

fn load_all_tags(conn: &Connection) -> StorageResult<HashMap<TaskId, BTreeSet<String>>> {
    let mut stmt = conn.prepare("SELECT task_id, tag FROM task_tags ORDER BY task_id, tag;")?;
    let mut rows = stmt.query([])?;
    let mut tags: HashMap<TaskId, BTreeSet<String>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let task_id: String = row.get(0)?;
        let tag: String = row.get(1)?;
        tags.entry(parse_uuid(&task_id, "task_tags.task_id")?)
            .or_default()
            .insert(tag);
    }
    Ok(tags)
}

fn parse_task_row(row: &Row<'_>) -> StorageResult<Task> {
    let id_text: String = row.get("id")?;
    let id = parse_uuid(&id_text, "tasks.id")?;

    let status_text: String = row.get("status")?;
    let status = TaskStatus::parse(&status_text).ok_or_else(|| {
        StorageError::InvalidData(format!("invalid status `{status_text}` in tasks.status"))
    })?;

    let priority_text: String = row.get("priority")?;
    let priority = Priority::parse(&priority_text).ok_or_else(|| {
        StorageError::InvalidData(format!(
            "invalid priority `{priority_text}` in tasks.priority"
        ))
    })?;

    let parent_text: Option<String> = row.get("parent_id")?;
    let parent_id = parent_text
        .as_deref()
        .map(|text| parse_uuid(text, "tasks.parent_id"))
        .transpose()?;

    Ok(Task {
        id,
        title: row.get("title")?,
        description: row.get("description")?,
        status,
        priority,
        due_at: row.get("due_at")?,
        tags: BTreeSet::new(),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
        version: version_from_db(row.get("version")?)?,
        parent_id,
        carried_over: row.get::<_, i64>("carried_over")? != 0,
    })
}

fn parse_uuid(value: &str, column: &'static str) -> StorageResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StorageError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn version_to_db(version: u64) -> StorageResult<i64> {
    i64::try_from(version)
        .map_err(|_| StorageError::InvalidData(format!("version {version} exceeds storage range")))
}

fn version_from_db(version: i64) -> StorageResult<u64> {
    u64::try_from(version)
        .map_err(|_| StorageError::InvalidData(format!("negative version `{version}` in tasks.version")))
}
