//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Register schema migrations in strictly increasing order.
//! - Apply pending migrations atomically.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - The applied version is recorded in `schema_meta` inside the same
//!   transaction as the migration steps.
//! - Running on an up-to-date database changes nothing.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

const SCHEMA_VERSION_KEY: &str = "schema_version";

const META_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);";

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("0001_init.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("0002_settings.sql"),
    },
    Migration {
        version: 3,
        sql: include_str!("0003_subtasks.sql"),
    },
];

/// Version range covered by one [`apply_migrations`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from_version: u32,
    pub to_version: u32,
}

impl MigrationOutcome {
    /// Returns whether any migration step ran.
    pub fn applied_any(&self) -> bool {
        self.from_version != self.to_version
    }
}

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Returns the schema version recorded in `conn`, or 0 for a fresh database.
pub fn current_version(conn: &Connection) -> DbResult<u32> {
    let meta_exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = 'schema_meta'
        );",
        [],
        |row| row.get(0),
    )?;
    if meta_exists == 0 {
        return Ok(0);
    }
    read_version(conn)
}

/// Applies all pending migrations on the provided connection.
///
/// Safe to call on every startup: only missing steps run.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<MigrationOutcome> {
    let latest = latest_version();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(META_TABLE_SQL)?;

    let current = read_version(&tx)?;
    if current > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
            [SCHEMA_VERSION_KEY, migration.version.to_string().as_str()],
        )?;
        info!(
            "event=db_migrate module=db status=ok step_version={}",
            migration.version
        );
    }
    tx.commit()?;

    Ok(MigrationOutcome {
        from_version: current,
        to_version: latest,
    })
}

fn read_version(conn: &Connection) -> DbResult<u32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = ?1;",
            [SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(text) => text.parse::<u32>().map_err(|_| {
            DbError::InvalidSchemaMeta(format!("schema_version `{text}` is not a number"))
        }),
    }
}
