//! Per-task event listeners
//!
//! Every task owns one [`Notifier`]. A task holds at most one listener per
//! [`EventKind`]; registering another one replaces it. Emitted events are
//! queued and handed to listeners one at a time by a dispatcher task, so a
//! listener never runs concurrently with another listener of the same task
//! and never runs while the task's own state is locked.

use crate::error::{Error, Result};
use crate::types::{Mode, Progress, TaskId};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Kinds of events a listener can subscribe to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Byte progress and state transitions; FRONTEND tasks only
    Progress,
    /// Successful completion
    Completed,
    /// Successful completion (short name, separate listener slot)
    Complete,
    /// Final failure
    Failed,
    /// Task paused
    Pause,
    /// Task resumed
    Resume,
    /// Task removed
    Remove,
}

impl EventKind {
    /// Name used when subscribing
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::Completed => "completed",
            EventKind::Complete => "complete",
            EventKind::Failed => "failed",
            EventKind::Pause => "pause",
            EventKind::Resume => "resume",
            EventKind::Remove => "remove",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "progress" => Ok(EventKind::Progress),
            "completed" => Ok(EventKind::Completed),
            "complete" => Ok(EventKind::Complete),
            "failed" => Ok(EventKind::Failed),
            "pause" => Ok(EventKind::Pause),
            "resume" => Ok(EventKind::Resume),
            "remove" => Ok(EventKind::Remove),
            other => Err(Error::parameter(
                "type",
                format!("unknown event kind {other:?}"),
            )),
        }
    }
}

/// Callback receiving the task's progress snapshot
///
/// Listeners are compared by identity: `off` with a listener only removes the
/// registration if it is a clone of the very same `Listener`.
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn(&Progress) + Send + Sync>);

impl Listener {
    /// Wrap a callback
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    /// Whether both handles refer to the same callback
    pub fn same_as(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn call(&self, progress: &Progress) {
        (self.0)(progress)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").finish_non_exhaustive()
    }
}

type Slots = Arc<Mutex<HashMap<EventKind, Listener>>>;

/// Listener registry and ordered dispatcher for one task
#[derive(Debug)]
pub(crate) struct Notifier {
    task_id: TaskId,
    mode: Mode,
    slots: Slots,
    queue: mpsc::UnboundedSender<(EventKind, Progress)>,
}

impl Notifier {
    /// Create the notifier and spawn its dispatcher on the current runtime
    pub(crate) fn new(task_id: TaskId, mode: Mode) -> Self {
        let slots: Slots = Arc::default();
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(task_id, slots.clone(), rx));
        Self {
            task_id,
            mode,
            slots,
            queue,
        }
    }

    /// Register `listener` for `kind`, replacing any previous one
    pub(crate) fn on(&self, kind: EventKind, listener: Listener) -> Result<()> {
        self.check_mode(kind, "on")?;
        let replaced = self.lock().insert(kind, listener).is_some();
        tracing::debug!(task_id = %self.task_id, kind = %kind, replaced, "Listener registered");
        Ok(())
    }

    /// Unregister the listener for `kind`
    ///
    /// With `listener` given, only that exact registration is removed. Missing
    /// registrations are not an error.
    pub(crate) fn off(&self, kind: EventKind, listener: Option<&Listener>) -> Result<()> {
        self.check_mode(kind, "off")?;
        let mut slots = self.lock();
        let matches = match (slots.get(&kind), listener) {
            (Some(current), Some(wanted)) => current.same_as(wanted),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            slots.remove(&kind);
            tracing::debug!(task_id = %self.task_id, kind = %kind, "Listener removed");
        }
        Ok(())
    }

    /// Queue an event for the listener registered for `kind`
    pub(crate) fn emit(&self, kind: EventKind, progress: Progress) {
        if kind == EventKind::Progress && self.mode == Mode::Background {
            return;
        }
        // The dispatcher only stops once every sender is gone
        let _ = self.queue.send((kind, progress));
    }

    fn check_mode(&self, kind: EventKind, operation: &str) -> Result<()> {
        if kind == EventKind::Progress && self.mode == Mode::Background {
            return Err(Error::UnsupportedOperation {
                operation: format!("{operation}({kind})"),
                mode: "background".to_string(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, Listener>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn dispatch(
    task_id: TaskId,
    slots: Slots,
    mut rx: mpsc::UnboundedReceiver<(EventKind, Progress)>,
) {
    while let Some((kind, progress)) = rx.recv().await {
        let listener = slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned();
        let Some(listener) = listener else {
            continue;
        };
        if std::panic::catch_unwind(AssertUnwindSafe(|| listener.call(&progress))).is_err() {
            tracing::error!(task_id = %task_id, kind = %kind, "Event listener panicked");
        }
    }
    tracing::trace!(task_id = %task_id, "Event dispatcher finished");
}
