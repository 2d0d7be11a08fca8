//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `taskdeck_core` linkage.
//! - Run one create/subtask/update/query/report/archive/remove round trip
//!   with deterministic output.
//!
//! Uses a volatile store unless `TASKDECK_DB_PATH` names a database file.

use std::process::ExitCode;
use std::sync::Arc;
use taskdeck_core::{
    ChangeNotifier, CoreConfig, MemoryTaskStore, ParentScope, Priority, RepoResult, SortKey,
    TaskCriteria, TaskDraft, TaskPatch, TaskRepository, TaskStatus, TaskStore,
};

fn main() -> ExitCode {
    println!("taskdeck_core version={}", taskdeck_core::core_version());

    let notifier = Arc::new(ChangeNotifier::new());
    notifier.subscribe_fn(|event| {
        match event.task() {
            Some(task) => println!(
                "event kind={} status={} version={} subtask={}",
                event.kind().as_str(),
                task.status,
                task.version,
                task.is_subtask()
            ),
            None => println!("event kind={}", event.kind().as_str()),
        }
        Ok(())
    });

    let outcome = match db_path_from_env() {
        Some(path) => taskdeck_core::open_repository(&CoreConfig::new(path), notifier)
            .map_err(|err| err.to_string())
            .and_then(|repo| round_trip(repo).map_err(|err| err.to_string())),
        None => TaskRepository::open(MemoryTaskStore::new(), notifier)
            .and_then(round_trip)
            .map_err(|err| err.to_string()),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("smoke failed: {message}");
            ExitCode::FAILURE
        }
    }
}

fn db_path_from_env() -> Option<String> {
    std::env::var("TASKDECK_DB_PATH")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

fn round_trip<S: TaskStore>(repo: TaskRepository<S>) -> RepoResult<()> {
    let task = repo.create(
        TaskDraft::new("Smoke check")
            .with_priority(Priority::High)
            .with_tag("smoke"),
    )?;
    repo.create_subtask(task.id, TaskDraft::new("Smoke step").with_tag("smoke"))?;
    let task = repo.update(
        task.id,
        TaskPatch::new().status(TaskStatus::InProgress),
        task.version,
    )?;

    let hits = repo.query(
        &TaskCriteria::new()
            .with_tag("smoke")
            .sort(SortKey::Priority, false),
    )?;
    println!("query hits={}", hits.len());
    let top_level = repo.query(&TaskCriteria::new().scope(ParentScope::TopLevel))?;
    println!("top_level={}", top_level.len());

    let task = repo.update(
        task.id,
        TaskPatch::new().status(TaskStatus::Done),
        task.version,
    )?;
    let task = repo.update(
        task.id,
        TaskPatch::new().status(TaskStatus::Archived),
        task.version,
    )?;
    let snapshot = repo.list()?;
    if let Ok(summary) = taskdeck_core::report(&snapshot, task.created_at, task.created_at + 1) {
        println!(
            "report total={} completed={} efficiency={:.1}%",
            summary.total,
            summary.completed,
            summary.efficiency_percent()
        );
    }
    repo.remove(task.id)?;

    println!("remaining={}", repo.list()?.len());
    repo.shutdown()
}
