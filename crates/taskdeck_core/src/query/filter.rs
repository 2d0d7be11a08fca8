//! Criteria-based filtering and stable sorting of task snapshots.

use crate::model::task::{normalize_tag, Task, TaskId, TaskStatus};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Primary sort key for [`view`]. Ties always fall back to ascending `id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    /// Undated tasks sort last in either direction.
    DueAt,
    Priority,
    #[default]
    CreatedAt,
    /// Case-insensitive.
    Title,
}

/// Which level of the subtask hierarchy a view covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParentScope {
    #[default]
    Any,
    TopLevel,
    ChildrenOf(TaskId),
}

/// Filter and sort options. Empty sets and `None` bounds do not filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCriteria {
    pub status_in: BTreeSet<TaskStatus>,
    /// Matches tasks carrying at least one of these tags.
    pub tag_in: BTreeSet<String>,
    /// Exclusive upper bound on `due_at`; undated tasks never match.
    pub due_before: Option<i64>,
    /// Exclusive lower bound on `due_at`; undated tasks never match.
    pub due_after: Option<i64>,
    /// Case-insensitive substring over title and description.
    pub text_match: Option<String>,
    pub parent_scope: ParentScope,
    pub sort_by: SortKey,
    pub ascending: bool,
}

impl Default for TaskCriteria {
    fn default() -> Self {
        Self {
            status_in: BTreeSet::new(),
            tag_in: BTreeSet::new(),
            due_before: None,
            due_after: None,
            text_match: None,
            parent_scope: ParentScope::Any,
            sort_by: SortKey::default(),
            ascending: true,
        }
    }
}

impl TaskCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status_in.insert(status);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag_in.insert(tag.into());
        self
    }

    pub fn due_before(mut self, due_before: i64) -> Self {
        self.due_before = Some(due_before);
        self
    }

    pub fn due_after(mut self, due_after: i64) -> Self {
        self.due_after = Some(due_after);
        self
    }

    pub fn text(mut self, needle: impl Into<String>) -> Self {
        self.text_match = Some(needle.into());
        self
    }

    pub fn scope(mut self, parent_scope: ParentScope) -> Self {
        self.parent_scope = parent_scope;
        self
    }

    pub fn sort(mut self, sort_by: SortKey, ascending: bool) -> Self {
        self.sort_by = sort_by;
        self.ascending = ascending;
        self
    }
}

/// Returns the tasks matching `criteria`, ordered by its sort settings.
///
/// Pure: `tasks` is only read and the result holds fresh copies.
pub fn view(tasks: &[Task], criteria: &TaskCriteria) -> Vec<Task> {
    let tags: BTreeSet<String> = criteria
        .tag_in
        .iter()
        .filter_map(|tag| normalize_tag(tag))
        .collect();
    let needle = criteria
        .text_match
        .as_deref()
        .map(|text| text.trim().to_lowercase())
        .filter(|text| !text.is_empty());

    let mut matched: Vec<Task> = tasks
        .iter()
        .filter(|task| criteria.status_in.is_empty() || criteria.status_in.contains(&task.status))
        .filter(|task| tags.is_empty() || task.tags.iter().any(|tag| tags.contains(tag)))
        .filter(|task| matches_due_window(task, criteria.due_after, criteria.due_before))
        .filter(|task| needle.as_deref().map_or(true, |n| matches_text(task, n)))
        .filter(|task| matches_scope(task, criteria.parent_scope))
        .cloned()
        .collect();

    matched.sort_by(|a, b| compare(a, b, criteria.sort_by, criteria.ascending));
    matched
}

/// A top-level task with its direct subtasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub task: Task,
    pub children: Vec<Task>,
}

/// Groups the matches of `criteria` under their top-level tasks.
///
/// Roots are the matching top-level tasks in sort order. Each root lists its
/// matching subtasks in the same order. Subtasks whose parent did not match
/// are left out. `criteria.parent_scope` is ignored.
pub fn tree_view(tasks: &[Task], criteria: &TaskCriteria) -> Vec<TaskNode> {
    let mut all = criteria.clone();
    all.parent_scope = ParentScope::Any;
    let matched = view(tasks, &all);

    let mut nodes: Vec<TaskNode> = matched
        .iter()
        .filter(|task| !task.is_subtask())
        .map(|task| TaskNode {
            task: task.clone(),
            children: Vec::new(),
        })
        .collect();
    for node in &mut nodes {
        node.children = matched
            .iter()
            .filter(|task| task.parent_id == Some(node.task.id))
            .cloned()
            .collect();
    }
    nodes
}

fn matches_scope(task: &Task, scope: ParentScope) -> bool {
    match scope {
        ParentScope::Any => true,
        ParentScope::TopLevel => task.parent_id.is_none(),
        ParentScope::ChildrenOf(parent) => task.parent_id == Some(parent),
    }
}

fn matches_due_window(task: &Task, after: Option<i64>, before: Option<i64>) -> bool {
    if after.is_none() && before.is_none() {
        return true;
    }
    let Some(due_at) = task.due_at else {
        return false;
    };
    after.map_or(true, |bound| due_at > bound) && before.map_or(true, |bound| due_at < bound)
}

fn matches_text(task: &Task, needle: &str) -> bool {
    task.title.to_lowercase().contains(needle)
        || task
            .description
            .as_deref()
            .is_some_and(|description| description.to_lowercase().contains(needle))
}

fn compare(a: &Task, b: &Task, sort_by: SortKey, ascending: bool) -> Ordering {
    let directed = |ordering: Ordering| {
        if ascending {
            ordering
        } else {
            ordering.reverse()
        }
    };

    let primary = match sort_by {
        SortKey::DueAt => match (a.due_at, b.due_at) {
            (Some(left), Some(right)) => directed(left.cmp(&right)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        SortKey::Priority => directed(a.priority.cmp(&b.priority)),
        SortKey::CreatedAt => directed(a.created_at.cmp(&b.created_at)),
        SortKey::Title => directed(a.title.to_lowercase().cmp(&b.title.to_lowercase())),
    };

    primary.then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::{tree_view, view, ParentScope, SortKey, TaskCriteria};
    use crate::model::task::{Priority, Task, TaskDraft, TaskStatus};
    use uuid::Uuid;

    const DAY_MS: i64 = 86_400_000;

    fn task(id: u128, draft: TaskDraft) -> Task {
        Task::from_draft(Uuid::from_u128(id), &draft, 1_000).unwrap()
    }

    #[test]
    fn due_sort_orders_ascending_with_id_tiebreak() {
        let third = task(1, TaskDraft::new("third").with_due_at(3 * DAY_MS));
        let first = task(2, TaskDraft::new("first").with_due_at(DAY_MS));
        let second_b = task(4, TaskDraft::new("second b").with_due_at(2 * DAY_MS));
        let second_a = task(3, TaskDraft::new("second a").with_due_at(2 * DAY_MS));
        let undated = task(9, TaskDraft::new("someday"));

        let criteria = TaskCriteria::new().sort(SortKey::DueAt, true);
        let titles: Vec<String> = view(
            &[third, undated, second_b, first, second_a],
            &criteria,
        )
        .into_iter()
        .map(|task| task.title)
        .collect();

        assert_eq!(
            titles,
            vec!["first", "second a", "second b", "third", "someday"]
        );
    }

    #[test]
    fn descending_due_sort_keeps_undated_last_and_ids_ascending() {
        let early = task(1, TaskDraft::new("early").with_due_at(DAY_MS));
        let late_b = task(3, TaskDraft::new("late b").with_due_at(2 * DAY_MS));
        let late_a = task(2, TaskDraft::new("late a").with_due_at(2 * DAY_MS));
        let undated = task(9, TaskDraft::new("undated"));

        let criteria = TaskCriteria::new().sort(SortKey::DueAt, false);
        let titles: Vec<String> = view(&[early, undated, late_b, late_a], &criteria)
            .into_iter()
            .map(|task| task.title)
            .collect();

        assert_eq!(titles, vec!["late a", "late b", "early", "undated"]);
    }

    #[test]
    fn filters_combine_status_tag_due_and_text() {
        let mut in_progress = task(
            1,
            TaskDraft::new("Buy milk")
                .with_description("Semi-skimmed")
                .with_tag("errands")
                .with_due_at(5 * DAY_MS),
        );
        in_progress.status = TaskStatus::InProgress;
        let open = task(
            2,
            TaskDraft::new("Buy bread")
                .with_tag("errands")
                .with_due_at(5 * DAY_MS),
        );
        let other_tag = task(3, TaskDraft::new("Milk the cow").with_tag("farm"));

        let tasks = vec![in_progress.clone(), open, other_tag];

        let by_status = TaskCriteria::new().with_status(TaskStatus::InProgress);
        assert_eq!(view(&tasks, &by_status), vec![in_progress.clone()]);

        let by_text = TaskCriteria::new().text("  SKIMMED ");
        assert_eq!(view(&tasks, &by_text), vec![in_progress.clone()]);

        let by_tag_and_window = TaskCriteria::new()
            .with_tag("Errands")
            .due_after(4 * DAY_MS)
            .due_before(6 * DAY_MS)
            .text("milk");
        assert_eq!(view(&tasks, &by_tag_and_window), vec![in_progress]);

        let window_excludes_undated = TaskCriteria::new().due_before(10 * DAY_MS);
        assert_eq!(view(&tasks, &window_excludes_undated).len(), 2);
    }

    #[test]
    fn priority_sort_descending_puts_high_first() {
        let low = task(1, TaskDraft::new("low").with_priority(Priority::Low));
        let high = task(2, TaskDraft::new("high").with_priority(Priority::High));
        let medium = task(3, TaskDraft::new("medium"));

        let criteria = TaskCriteria::new().sort(SortKey::Priority, false);
        let titles: Vec<String> = view(&[low, high, medium], &criteria)
            .into_iter()
            .map(|task| task.title)
            .collect();
        assert_eq!(titles, vec!["high", "medium", "low"]);
    }

    #[test]
    fn title_sort_is_case_insensitive() {
        let b = task(1, TaskDraft::new("banana"));
        let a = task(2, TaskDraft::new("Apple"));
        let criteria = TaskCriteria::new().sort(SortKey::Title, true);
        let titles: Vec<String> = view(&[b, a], &criteria)
            .into_iter()
            .map(|task| task.title)
            .collect();
        assert_eq!(titles, vec!["Apple", "banana"]);
    }

    #[test]
    fn scope_and_tree_group_subtasks_under_parents() {
        let groceries = task(1, TaskDraft::new("groceries"));
        let mut milk = task(2, TaskDraft::new("milk"));
        milk.parent_id = Some(groceries.id);
        let mut bread = task(3, TaskDraft::new("bread"));
        bread.parent_id = Some(groceries.id);
        bread.status = TaskStatus::Done;
        let laundry = task(4, TaskDraft::new("laundry"));
        let tasks = vec![bread.clone(), laundry.clone(), milk.clone(), groceries.clone()];

        let top = TaskCriteria::new().scope(ParentScope::TopLevel);
        assert_eq!(view(&tasks, &top), vec![groceries.clone(), laundry.clone()]);
        let children = TaskCriteria::new().scope(ParentScope::ChildrenOf(groceries.id));
        assert_eq!(view(&tasks, &children), vec![milk.clone(), bread]);

        let open_tree = tree_view(&tasks, &TaskCriteria::new().with_status(TaskStatus::Open));
        assert_eq!(open_tree.len(), 2);
        assert_eq!(open_tree[0].task, groceries);
        assert_eq!(open_tree[0].children, vec![milk]);
        assert_eq!(open_tree[1].task, laundry);
        assert!(open_tree[1].children.is_empty());
    }
}
