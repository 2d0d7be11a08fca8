//! Completion statistics over a creation-time window.
//!
//! # Invariants
//! - The window is `[from, to)` in epoch milliseconds and is never empty.
//! - Day buckets are consecutive 24h slices starting at `from`; the last
//!   one is cut short at `to`.
//! - `completion_ratio` is `0.0` when no task falls in the window.

use crate::model::task::Task;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;
/// Upper bound on the number of day buckets in one report.
pub const MAX_REPORT_DAYS: usize = 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportError {
    EmptyRange { from: i64, to: i64 },
    RangeTooLong { days: usize, max: usize },
}

impl Display for ReportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyRange { from, to } => {
                write!(f, "report window [{from}, {to}) is empty")
            }
            Self::RangeTooLong { days, max } => {
                write!(f, "report window spans {days} days, max is {max}")
            }
        }
    }
}

impl Error for ReportError {}

/// Activity inside one day bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyCount {
    pub day_start: i64,
    /// Tasks created inside the bucket.
    pub created: usize,
    /// Tasks whose `completed_at` falls inside the bucket, wherever they
    /// were created.
    pub completed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub from: i64,
    pub to: i64,
    /// Tasks created inside the window.
    pub total: usize,
    /// Of `total`, the ones that have been completed.
    pub completed: usize,
    pub completion_ratio: f64,
    pub days: Vec<DailyCount>,
}

impl CompletionReport {
    pub fn efficiency_percent(&self) -> f64 {
        self.completion_ratio * 100.0
    }
}

/// Summarizes `tasks` created in `[from, to)`. Pure.
pub fn report(tasks: &[Task], from: i64, to: i64) -> Result<CompletionReport, ReportError> {
    if from >= to {
        return Err(ReportError::EmptyRange { from, to });
    }
    let span = to.saturating_sub(from);
    let day_count = usize::try_from(span.saturating_add(DAY_MS - 1) / DAY_MS).unwrap_or(usize::MAX);
    if day_count > MAX_REPORT_DAYS {
        return Err(ReportError::RangeTooLong {
            days: day_count,
            max: MAX_REPORT_DAYS,
        });
    }

    let mut days: Vec<DailyCount> = (0..day_count)
        .map(|index| DailyCount {
            day_start: from + DAY_MS * index as i64,
            created: 0,
            completed: 0,
        })
        .collect();
    let bucket = |at: i64| -> Option<usize> {
        (from..to)
            .contains(&at)
            .then(|| ((at - from) / DAY_MS) as usize)
    };

    let mut total = 0;
    let mut completed = 0;
    for task in tasks {
        if let Some(index) = bucket(task.created_at) {
            total += 1;
            days[index].created += 1;
            if task.completed_at.is_some() {
                completed += 1;
            }
        }
        if let Some(index) = task.completed_at.and_then(bucket) {
            days[index].completed += 1;
        }
    }

    let completion_ratio = if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64
    };

    Ok(CompletionReport {
        from,
        to,
        total,
        completed,
        completion_ratio,
        days,
    })
}

#[cfg(test)]
mod tests {
    use super::{report, ReportError, DAY_MS, MAX_REPORT_DAYS};
    use crate::model::task::{Task, TaskDraft, TaskStatus};
    use uuid::Uuid;

    fn created_at(at: i64) -> Task {
        Task::from_draft(Uuid::new_v4(), &TaskDraft::new("entry"), at).unwrap()
    }

    fn done(mut task: Task, at: i64) -> Task {
        task.status = TaskStatus::Done;
        task.updated_at = at;
        task.completed_at = Some(at);
        task
    }

    #[test]
    fn counts_completion_inside_window() {
        let tasks = vec![
            done(created_at(10), DAY_MS + 5),
            created_at(DAY_MS + 1),
            done(created_at(DAY_MS + 2), DAY_MS + 3),
            created_at(2 * DAY_MS + 7),
            // Created before the window but finished inside it.
            done(created_at(-5), 20),
        ];

        let summary = report(&tasks, 0, 2 * DAY_MS + 10).unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.efficiency_percent(), 50.0);

        let per_day: Vec<(i64, usize, usize)> = summary
            .days
            .iter()
            .map(|day| (day.day_start, day.created, day.completed))
            .collect();
        assert_eq!(
            per_day,
            vec![(0, 1, 1), (DAY_MS, 2, 2), (2 * DAY_MS, 1, 0)]
        );
    }

    #[test]
    fn empty_window_yields_zero_efficiency() {
        let summary = report(&[], 0, DAY_MS).unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.completion_ratio, 0.0);
        assert_eq!(summary.days.len(), 1);
    }

    #[test]
    fn rejects_empty_and_oversized_windows() {
        assert_eq!(
            report(&[], 5, 5),
            Err(ReportError::EmptyRange { from: 5, to: 5 })
        );
        let too_long = report(&[], 0, (MAX_REPORT_DAYS as i64 + 1) * DAY_MS).unwrap_err();
        assert!(matches!(too_long, ReportError::RangeTooLong { .. }));
    }
}
