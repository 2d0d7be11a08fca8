//! Post-commit change notification.
//!
//! # Responsibility
//! - Keep an explicit, ordered list of registered observers.
//! - Deliver task mutation events synchronously after commit.
//!
//! # Invariants
//! - Observers run in subscription order.
//! - A failing or panicking observer is logged and skipped; later observers
//!   still receive the event and the committed mutation stands.
//! - Delivery runs without holding the registry lock, so observers may
//!   subscribe or unsubscribe from inside a callback.

use crate::logging::sanitize_message;
use crate::model::task::{Task, TaskId};
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const MAX_OBSERVER_MESSAGE_CHARS: usize = 160;

/// Mutation category carried by a [`TaskEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEventKind {
    Created,
    Updated,
    Deleted,
}

impl TaskEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

/// Event published after a repository mutation commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// New task value.
    Created(Task),
    /// Task value after the update.
    Updated(Task),
    /// Id of the physically removed task.
    Deleted(TaskId),
}

impl TaskEvent {
    pub fn kind(&self) -> TaskEventKind {
        match self {
            Self::Created(_) => TaskEventKind::Created,
            Self::Updated(_) => TaskEventKind::Updated,
            Self::Deleted(_) => TaskEventKind::Deleted,
        }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Created(task) | Self::Updated(task) => task.id,
            Self::Deleted(id) => *id,
        }
    }

    /// Returns the new task value, when the event carries one.
    pub fn task(&self) -> Option<&Task> {
        match self {
            Self::Created(task) | Self::Updated(task) => Some(task),
            Self::Deleted(_) => None,
        }
    }
}

/// Failure reported by an observer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverError {
    message: String,
}

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ObserverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "observer failed: {}", self.message)
    }
}

impl Error for ObserverError {}

/// Consumer of task mutation events.
///
/// Callbacks run on the mutating thread while the repository's writer slot
/// is still held: they may read from the repository but must not mutate it.
pub trait TaskObserver: Send + Sync {
    fn on_event(&self, event: &TaskEvent) -> Result<(), ObserverError>;

    /// Label used in diagnostics.
    fn name(&self) -> &str {
        "observer"
    }
}

struct FnObserver<F> {
    callback: F,
}

impl<F> TaskObserver for FnObserver<F>
where
    F: Fn(&TaskEvent) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_event(&self, event: &TaskEvent) -> Result<(), ObserverError> {
        (self.callback)(event)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

/// Opaque registration token returned by [`ChangeNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

/// Outcome counts for one published event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Ordered observer registry. Hand one instance to the repository at
/// construction; there is no global bus.
#[derive(Default)]
pub struct ChangeNotifier {
    observers: Mutex<Vec<(SubscriptionHandle, Arc<dyn TaskObserver>)>>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` after all existing subscriptions.
    pub fn subscribe(&self, observer: Arc<dyn TaskObserver>) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((handle, observer));
        debug!(
            "event=observer_subscribe module=notify status=ok handle={}",
            handle.0
        );
        handle
    }

    /// Registers a closure observer.
    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&TaskEvent) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnObserver { callback }))
    }

    /// Removes a subscription. Returns `false` for unknown handles.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(current, _)| *current != handle);
        let removed = observers.len() != before;
        debug!(
            "event=observer_unsubscribe module=notify status={} handle={}",
            if removed { "ok" } else { "unknown" },
            handle.0
        );
        removed
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }

    /// Delivers `event` to every observer in subscription order.
    pub(crate) fn publish(&self, event: &TaskEvent) -> DeliveryReport {
        let snapshot: Vec<(SubscriptionHandle, Arc<dyn TaskObserver>)> =
            self.observers.lock().clone();
        let mut report = DeliveryReport::default();

        for (handle, observer) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(
                        "event=observer_failed module=notify status=error handle={} observer={} kind={} task_id={} error={}",
                        handle.0,
                        observer.name(),
                        event.kind().as_str(),
                        event.task_id(),
                        sanitize_message(err.message(), MAX_OBSERVER_MESSAGE_CHARS)
                    );
                }
                Err(payload) => {
                    report.failed += 1;
                    let message = if let Some(text) = payload.downcast_ref::<&str>() {
                        (*text).to_string()
                    } else if let Some(text) = payload.downcast_ref::<String>() {
                        text.clone()
                    } else {
                        "non-string panic payload".to_string()
                    };
                    error!(
                        "event=observer_panicked module=notify status=error handle={} observer={} kind={} task_id={} payload={}",
                        handle.0,
                        observer.name(),
                        event.kind().as_str(),
                        event.task_id(),
                        sanitize_message(&message, MAX_OBSERVER_MESSAGE_CHARS)
                    );
                }
            }
        }

        report
    }
}
