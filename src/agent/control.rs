//! Task state machine: start, pause, resume, stop, remove, listeners.

use super::task::{Control, Task, TaskInner};
use crate::error::{Error, Result};
use crate::notify::{EventKind, Listener};
use crate::transfer::part_path;
use crate::types::{Event, Reason, State};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::task::JoinHandle;

impl Task {
    /// Start the transfer
    ///
    /// Valid from INITIALIZED, PAUSED, STOPPED, and FAILED when the task was
    /// created with `retry` on. A PAUSED task continues from its partial data;
    /// every other state starts over. Starting a RUNNING or RETRYING task is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// - 401 when `index` is out of range or `begins > ends`
    /// - 21900006 when the task was removed
    /// - 21900007 when the task completed, or failed with `retry` off
    /// - 13400003 when the agent is shutting down
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use request_agent::*;
    /// # async fn example(task: Task) -> Result<()> {
    /// task.start().await?;
    /// // A second start while running changes nothing
    /// task.start().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;

        match control.state {
            State::Running | State::Retrying => return Ok(()),
            State::Removed => return Err(Error::TaskNotFound(inner.id)),
            State::Completed => return Err(inner.invalid("start", control.state)),
            State::Failed if !inner.config.retry => {
                return Err(inner.invalid("start", control.state));
            }
            State::Initialized | State::Paused | State::Stopped | State::Failed => {}
        }

        inner.config.check_startable()?;
        if !inner.env.accepting() {
            return Err(Error::ShuttingDown);
        }

        let resume = control.state == State::Paused;
        inner.launch(&mut control, resume, &[]);
        tracing::info!(task_id = %inner.id, resume, "Task started");
        inner.env.emit(Event::Started { id: inner.id });
        Ok(())
    }

    /// Pause a running task
    ///
    /// The in-flight request is cancelled and partial data is kept, so
    /// [`resume`](Task::resume) continues where the transfer left off.
    ///
    /// # Errors
    ///
    /// - 21900006 when the task was removed
    /// - 21900007 when the task is not RUNNING or RETRYING, including a task
    ///   that was never started
    pub async fn pause(&self) -> Result<()> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;

        match control.state {
            State::Running | State::Retrying => {}
            State::Removed => return Err(Error::TaskNotFound(inner.id)),
            state => return Err(inner.invalid("pause", state)),
        }

        control.paused_reason = Some(Reason::UserOperation);
        inner.interrupt(&mut control, State::Paused, &[EventKind::Pause]);
        tracing::info!(task_id = %inner.id, "Task paused");
        inner.env.emit(Event::Paused { id: inner.id });
        Ok(())
    }

    /// Resume a paused task
    ///
    /// # Errors
    ///
    /// - 21900006 when the task was removed
    /// - 21900007 when the task is not PAUSED
    /// - 13400003 when the agent is shutting down
    pub async fn resume(&self) -> Result<()> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;

        match control.state {
            State::Paused => {}
            State::Removed => return Err(Error::TaskNotFound(inner.id)),
            state => return Err(inner.invalid("resume", state)),
        }
        if !inner.env.accepting() {
            return Err(Error::ShuttingDown);
        }

        inner.launch(&mut control, true, &[EventKind::Resume]);
        tracing::info!(task_id = %inner.id, "Task resumed");
        inner.env.emit(Event::Resumed { id: inner.id });
        Ok(())
    }

    /// Stop the task
    ///
    /// Succeeds from every state except REMOVED; stopping a task that already
    /// stopped, completed or failed changes nothing. A stopped task starts
    /// over when started again.
    ///
    /// # Errors
    ///
    /// 21900006 when the task was removed.
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;

        match control.state {
            State::Stopped | State::Completed | State::Failed => return Ok(()),
            State::Removed => return Err(Error::TaskNotFound(inner.id)),
            State::Initialized | State::Running | State::Retrying | State::Paused => {}
        }

        control.paused_reason = None;
        inner.interrupt(&mut control, State::Stopped, &[]);
        tracing::info!(task_id = %inner.id, "Task stopped");
        inner.env.emit(Event::Stopped { id: inner.id });
        Ok(())
    }

    /// Remove the task
    ///
    /// Cancels any in-flight transfer, waits (up to `shutdown_timeout`) for
    /// the worker to let go of its files, deletes the partial download,
    /// unregisters the task and moves it to REMOVED. Safe from every state;
    /// removing twice returns `true` both times.
    pub async fn remove(&self) -> Result<bool> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;
        if control.state == State::Removed {
            return Ok(true);
        }

        let from = control.state;
        inner.removed.store(true, Ordering::SeqCst);
        inner.interrupt(&mut control, State::Removed, &[EventKind::Remove]);
        let worker = control.worker.take();
        drop(control);

        inner.registry.detach(inner.id).await;
        // The cancelled worker may still be writing the partial file
        if let Some(worker) = worker
            && tokio::time::timeout(inner.env.config.shutdown_timeout, worker)
                .await
                .is_err()
        {
            tracing::warn!(task_id = %inner.id, "Worker did not stop in time, partial file may remain");
        }
        if inner.leaves_partial_file(from)
            && let Some(dest) = inner.config.saveas.as_deref()
        {
            let part = part_path(dest);
            match tokio::fs::remove_file(&part).await {
                Ok(()) => {
                    tracing::debug!(task_id = %inner.id, path = %part.display(), "Removed partial file");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(task_id = %inner.id, path = %part.display(), error = %e, "Failed to remove partial file");
                }
            }
        }

        tracing::info!(task_id = %inner.id, %from, "Task removed");
        inner.env.emit(Event::Removed { id: inner.id });
        Ok(true)
    }

    /// Limit the transfer speed of this task in bytes per second
    ///
    /// Takes effect immediately, including for a running transfer.
    ///
    /// # Errors
    ///
    /// - 401 when `bytes_per_second` is below `min_speed_limit`
    /// - 21900006 when the task was removed
    pub async fn set_max_speed(&self, bytes_per_second: u64) -> Result<()> {
        let inner = &self.inner;
        let control = inner.control.lock().await;
        if control.state == State::Removed {
            return Err(Error::TaskNotFound(inner.id));
        }

        let min = inner.env.config.min_speed_limit;
        if bytes_per_second < min {
            return Err(Error::parameter(
                "speed",
                format!("{bytes_per_second} B/s is below the minimum of {min} B/s"),
            ));
        }
        inner.limiter.set_limit(Some(bytes_per_second));
        tracing::debug!(task_id = %inner.id, bytes_per_second, "Task speed limit set");
        Ok(())
    }

    /// Register `listener` for the event kind named `kind`
    ///
    /// Kinds are `progress`, `completed`, `complete`, `failed`, `pause`,
    /// `resume` and `remove`. A later registration for the same kind replaces
    /// the earlier one. Listeners run one at a time, in event order, on a
    /// dispatcher separate from the task's control path.
    ///
    /// # Errors
    ///
    /// - 401 for an unknown kind
    /// - 21900006 when the task was removed
    /// - 21900005 for `progress` on a BACKGROUND task
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use request_agent::*;
    /// # fn example(task: Task) -> Result<()> {
    /// task.on("completed", Listener::new(|progress| {
    ///     println!("done: {} bytes", progress.processed);
    /// }))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn on(&self, kind: &str, listener: Listener) -> Result<()> {
        let kind = kind.parse::<EventKind>()?;
        self.inner.check_not_removed()?;
        self.inner.notifier.on(kind, listener)
    }

    /// Unregister the listener for the event kind named `kind`
    ///
    /// With `listener` given only that exact registration is dropped.
    /// Nothing registered is not an error.
    ///
    /// # Errors
    ///
    /// Same as [`on`](Task::on).
    pub fn off(&self, kind: &str, listener: Option<&Listener>) -> Result<()> {
        let kind = kind.parse::<EventKind>()?;
        self.inner.check_not_removed()?;
        self.inner.notifier.off(kind, listener)
    }

    /// Pause an active task for shutdown and hand back its worker
    pub(super) async fn interrupt_for_shutdown(&self) -> Option<JoinHandle<()>> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;
        if !control.state.is_active() {
            return None;
        }

        control.paused_reason = Some(Reason::Shutdown);
        inner.interrupt(&mut control, State::Paused, &[EventKind::Pause]);
        tracing::info!(task_id = %inner.id, "Task paused for shutdown");
        inner.env.emit(Event::Paused { id: inner.id });
        control.worker.take()
    }
}

impl TaskInner {
    fn invalid(&self, operation: &str, state: State) -> Error {
        tracing::debug!(task_id = %self.id, operation, %state, "Operation rejected in current state");
        Error::InvalidState {
            id: self.id,
            operation: operation.to_string(),
            state,
        }
    }

    fn check_not_removed(&self) -> Result<()> {
        if self.removed.load(Ordering::SeqCst) {
            return Err(Error::TaskNotFound(self.id));
        }
        Ok(())
    }

    /// Cancel the running worker, if any, and move to `state`
    ///
    /// The worker is not awaited; its handle stays in `control` so the next
    /// worker can wait for it before touching the destination files.
    fn interrupt(&self, control: &mut Control, state: State, kinds: &[EventKind]) {
        if let Some(cancel) = control.cancel.take() {
            cancel.cancel();
        }
        self.transition(control, state, kinds);
    }

    /// Move to RUNNING and spawn a worker for the new run
    pub(super) fn launch(self: &Arc<Self>, control: &mut Control, resume: bool, kinds: &[EventKind]) {
        control.failed_reason = None;
        control.paused_reason = None;
        self.tries.store(0, Ordering::SeqCst);
        if !resume {
            let mut meter = self.meter();
            meter.progress.processed = 0;
            meter.progress.index = 0;
            meter.last_emit = None;
        }

        let (generation, _) = self.transition(control, State::Running, kinds);
        let cancel = tokio_util::sync::CancellationToken::new();
        control.cancel = Some(cancel.clone());

        let previous = control.worker.take();
        let task = Arc::clone(self);
        control.worker = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            task.run(generation, cancel, resume).await;
        }));
    }
}
