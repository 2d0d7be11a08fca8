use serde_json::json;
use taskdeck_core::model::task::{validate, TITLE_MAX_CHARS};
use taskdeck_core::{
    can_transition, Priority, Task, TaskDraft, TaskId, TaskPatch, TaskStatus,
    TaskValidationError,
};

fn sample() -> Task {
    Task::from_draft(
        TaskId::new_v4(),
        &TaskDraft::new("Plan sprint")
            .with_priority(Priority::High)
            .with_tag("Work"),
        1_000,
    )
    .unwrap()
}

#[test]
fn serializes_with_snake_case_wire_names() {
    let task = sample();
    let value = serde_json::to_value(&task).unwrap();

    assert_eq!(value["status"], json!("open"));
    assert_eq!(value["priority"], json!("high"));
    assert_eq!(value["tags"], json!(["work"]));
    assert_eq!(value["version"], json!(0));
    assert_eq!(value["completed_at"], json!(null));

    let in_progress = serde_json::to_value(TaskStatus::InProgress).unwrap();
    assert_eq!(in_progress, json!("in_progress"));
}

#[test]
fn deserialization_rejects_invalid_tasks() {
    let mut value = serde_json::to_value(sample()).unwrap();
    value["updated_at"] = json!(10);

    let err = serde_json::from_value::<Task>(value).unwrap_err();
    assert!(err.to_string().contains("updated_at"));
}

#[test]
fn deserialization_accepts_valid_tasks() {
    let task = sample();
    let text = serde_json::to_string(&task).unwrap();
    assert_eq!(serde_json::from_str::<Task>(&text).unwrap(), task);
}

#[test]
fn validate_reports_first_broken_invariant() {
    let mut task = sample();
    task.title = "x".repeat(TITLE_MAX_CHARS + 1);
    assert!(matches!(
        validate(&task),
        Err(TaskValidationError::TitleTooLong { .. })
    ));

    let mut task = sample();
    task.id = TaskId::nil();
    assert_eq!(validate(&task), Err(TaskValidationError::NilId));

    let mut task = sample();
    task.tags.insert("Not Lower".to_string());
    assert!(matches!(
        validate(&task),
        Err(TaskValidationError::InvalidTag(_))
    ));
}

#[test]
fn patch_leaves_original_untouched() {
    let task = sample();
    let next = task
        .apply_patch(&TaskPatch::new().title("Plan retro").due_at(Some(5_000)), 2_000)
        .unwrap();

    assert_eq!(task.title, "Plan sprint");
    assert_eq!(task.version, 0);
    assert_eq!(next.title, "Plan retro");
    assert_eq!(next.due_at, Some(5_000));
    assert_eq!(next.updated_at, 2_000);
    assert_eq!(next.version, 1);
}

#[test]
fn clearing_optional_fields() {
    let task = Task::from_draft(
        TaskId::new_v4(),
        &TaskDraft::new("Call bank")
            .with_description("ask about fees")
            .with_due_at(9_000),
        1_000,
    )
    .unwrap();

    let cleared = task
        .apply_patch(&TaskPatch::new().description(None).due_at(None), 1_500)
        .unwrap();
    assert_eq!(cleared.description, None);
    assert_eq!(cleared.due_at, None);

    let blank = task
        .apply_patch(&TaskPatch::new().description(Some("   ".into())), 1_500)
        .unwrap();
    assert_eq!(blank.description, None);
}

#[test]
fn archived_is_terminal() {
    for to in [TaskStatus::Open, TaskStatus::InProgress, TaskStatus::Done] {
        assert!(!can_transition(TaskStatus::Archived, to));
    }
    assert!(can_transition(TaskStatus::Archived, TaskStatus::Archived));
    assert!(TaskStatus::Archived.is_terminal());
    assert!(!TaskStatus::Done.is_terminal());
}

#[test]
fn wire_form_without_subtask_fields_still_decodes() {
    let task = sample();
    let mut value = serde_json::to_value(&task).unwrap();
    assert_eq!(value["parent_id"], json!(null));
    assert_eq!(value["carried_over"], json!(false));

    let object = value.as_object_mut().unwrap();
    object.remove("parent_id");
    object.remove("carried_over");
    let decoded = serde_json::from_value::<Task>(value).unwrap();
    assert_eq!(decoded, task);
    assert!(!decoded.is_subtask());
}

#[test]
fn task_cannot_be_its_own_parent() {
    let mut task = sample();
    task.parent_id = Some(task.id);
    assert_eq!(validate(&task), Err(TaskValidationError::SelfParent));

    let mut value = serde_json::to_value(sample()).unwrap();
    value["parent_id"] = value["id"].clone();
    assert!(serde_json::from_value::<Task>(value).is_err());
}
