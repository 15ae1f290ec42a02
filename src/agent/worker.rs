//! Transfer worker: runs attempts under the retry controller and reports
//! progress back into the task.

use super::task::{Meter, TaskInner};
use crate::error::TransferError;
use crate::notify::EventKind;
use crate::retry::{RetryAttempt, retry_with_backoff};
use crate::transfer::{Outcome, ProgressSink, Transfer};
use crate::types::{Event, State};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

impl TaskInner {
    /// Body of a worker spawned by `launch`
    ///
    /// `generation` identifies the RUNNING transition that spawned it. The
    /// worker gives up silently as soon as a control operation supersedes
    /// that generation.
    pub(super) async fn run(self: Arc<Self>, generation: u64, cancel: CancellationToken, resume: bool) {
        let current = AtomicU64::new(generation);

        let attempts = retry_with_backoff(
            &self.env.config.retry,
            self.config.retry,
            |info| self.enter_retrying(&current, info),
            |attempt| self.attempt(&current, &cancel, attempt, resume),
        );
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(task_id = %self.id, "Worker cancelled");
                return;
            }
            result = attempts => result,
        };

        let generation = current.load(Ordering::SeqCst);
        match result {
            Ok(Outcome::Completed { bytes }) => self.finish_completed(generation, bytes).await,
            Ok(Outcome::Cancelled) => {
                tracing::debug!(task_id = %self.id, "Transfer cancelled");
            }
            Err(e) => self.finish_failed(generation, e).await,
        }
    }

    /// Retry hook: move to RETRYING before the backoff delay
    async fn enter_retrying(&self, current: &AtomicU64, info: RetryAttempt) -> bool {
        let mut control = self.control.lock().await;
        if !self.is_current(current.load(Ordering::SeqCst)) {
            return false;
        }

        let (generation, _) = self.transition(&mut control, State::Retrying, &[]);
        current.store(generation, Ordering::SeqCst);
        tracing::warn!(
            task_id = %self.id,
            attempt = info.attempt,
            delay_ms = info.delay.as_millis(),
            error = %info.error,
            "Transfer attempt failed, retrying"
        );
        self.env.emit(Event::Retrying {
            id: self.id,
            attempt: info.attempt,
            error: info.error,
        });
        true
    }

    async fn attempt(
        self: &Arc<Self>,
        current: &AtomicU64,
        cancel: &CancellationToken,
        attempt: u32,
        resume: bool,
    ) -> Result<Outcome, TransferError> {
        let generation = if attempt > 1 {
            let mut control = self.control.lock().await;
            if !self.is_current(current.load(Ordering::SeqCst)) {
                return Ok(Outcome::Cancelled);
            }
            let (generation, _) = self.transition(&mut control, State::Running, &[]);
            current.store(generation, Ordering::SeqCst);
            generation
        } else {
            current.load(Ordering::SeqCst)
        };
        self.tries.store(attempt, Ordering::SeqCst);

        let validator = {
            let meter = self.meter();
            let extras = &meter.progress.extras;
            extras
                .get("etag")
                .or_else(|| extras.get("last-modified"))
                .cloned()
        };

        tracing::debug!(task_id = %self.id, attempt, url = %self.config.url, "Starting transfer attempt");
        Transfer {
            config: &self.config,
            defaults: &self.env.config,
            limiter: &self.limiter,
            cancel,
            sink: Arc::new(TaskSink {
                task: Arc::clone(self),
                generation,
            }),
            resume: resume || attempt > 1,
            validator,
        }
        .execute()
        .await
    }

    async fn finish_completed(&self, generation: u64, bytes: u64) {
        let mut control = self.control.lock().await;
        if !self.is_current(generation) {
            return;
        }

        control.cancel = None;
        let (_, progress) = self.transition(
            &mut control,
            State::Completed,
            &[EventKind::Completed, EventKind::Complete],
        );
        tracing::info!(task_id = %self.id, bytes, "Task completed");
        self.env.emit(Event::Completed {
            id: self.id,
            progress,
        });
    }

    async fn finish_failed(&self, generation: u64, error: TransferError) {
        let mut control = self.control.lock().await;
        if !self.is_current(generation) {
            return;
        }

        let reason = error.reason();
        control.cancel = None;
        control.failed_reason = Some(reason);
        self.transition(&mut control, State::Failed, &[EventKind::Failed]);
        tracing::error!(
            task_id = %self.id,
            reason = %reason,
            error = %error,
            tries = self.tries.load(Ordering::SeqCst),
            "Task failed"
        );
        self.env.emit(Event::Failed {
            id: self.id,
            reason,
            error: error.to_string(),
        });
    }
}

/// Routes transfer observations into the task's progress snapshot
struct TaskSink {
    task: Arc<TaskInner>,
    generation: u64,
}

impl TaskSink {
    /// Apply `update` to the snapshot unless this attempt is stale, then
    /// publish it when the throttle allows (`force` skips the throttle)
    fn update(&self, force: bool, update: impl FnOnce(&mut Meter)) {
        let task = &self.task;
        let mut meter = task.meter();
        if meter.generation != self.generation {
            return;
        }
        update(&mut *meter);

        let progress = &meter.progress;
        let finished = progress.sizes.iter().all(|size| *size >= 0)
            && progress.processed == progress.sizes.iter().map(|s| *s as u64).sum::<u64>();
        let now = Instant::now();
        let due = meter
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= task.env.config.progress_interval);
        if !(force || finished || due) {
            return;
        }

        meter.last_emit = Some(now);
        let snapshot = meter.progress.clone();
        task.notifier.emit(EventKind::Progress, snapshot.clone());
        if task.broadcasts_progress() {
            task.env.emit(Event::Progress {
                id: task.id,
                progress: snapshot,
            });
        }
    }
}

impl ProgressSink for TaskSink {
    fn begin(&self, sizes: Vec<i64>, offset: u64) {
        self.update(true, |meter| {
            meter.progress.sizes = sizes;
            meter.progress.processed = offset;
        });
    }

    fn metadata(&self, mime_type: Option<String>, extras: HashMap<String, String>) {
        let mut meter = self.task.meter();
        if meter.generation != self.generation {
            return;
        }
        if mime_type.is_some() {
            meter.mime_type = mime_type;
        }
        meter.progress.extras.extend(extras);
    }

    fn select(&self, index: usize) {
        let mut meter = self.task.meter();
        if meter.generation == self.generation {
            meter.progress.index = index;
        }
    }

    fn advance(&self, bytes: u64) {
        self.update(false, |meter| meter.progress.processed += bytes);
    }
}
