//! Task handle and the state shared with its worker.
//!
//! Two locks guard a task:
//! - `control` (async) serializes control operations and worker hand-offs;
//!   it owns the state, the cancellation token and the worker handle
//! - `meter` (sync, never held across an await) owns the progress snapshot
//!   and a generation counter
//!
//! Every state change happens under `control` and is published under
//! `meter`, bumping the generation. Workers and their progress sinks carry
//! the generation they were started with and drop whatever they observe
//! once it is stale, so a cancelled worker can never overwrite the state or
//! emit progress after a newer transition.

use super::Env;
use crate::error::{Error, Result};
use crate::notify::{EventKind, Notifier};
use crate::registry::WeakRegistry;
use crate::speed_limiter::SpeedLimiter;
use crate::task_config::TaskConfig;
use crate::types::{Action, Mode, Progress, Reason, State, TaskId, TaskInfo};
use crate::utils::display_name;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a registered task (cloneable, all clones control the same task)
#[derive(Clone)]
pub struct Task {
    pub(super) inner: Arc<TaskInner>,
}

pub(super) struct TaskInner {
    pub(super) id: TaskId,
    pub(super) bundle: String,
    pub(super) config: TaskConfig,
    pub(super) ctime: DateTime<Utc>,
    pub(super) env: Arc<Env>,
    pub(super) registry: WeakRegistry,
    pub(super) control: tokio::sync::Mutex<Control>,
    meter: Mutex<Meter>,
    pub(super) limiter: SpeedLimiter,
    pub(super) notifier: Notifier,
    /// Attempts made in the current run
    pub(super) tries: AtomicU32,
    /// Set once `remove` ran; checked by the synchronous listener calls
    pub(super) removed: AtomicBool,
}

pub(super) struct Control {
    pub(super) state: State,
    pub(super) cancel: Option<CancellationToken>,
    /// Most recent worker; a new worker waits for it before touching files
    pub(super) worker: Option<JoinHandle<()>>,
    pub(super) failed_reason: Option<Reason>,
    pub(super) paused_reason: Option<Reason>,
    pub(super) mtime: DateTime<Utc>,
}

pub(super) struct Meter {
    pub(super) generation: u64,
    pub(super) progress: Progress,
    pub(super) mime_type: Option<String>,
    pub(super) last_emit: Option<Instant>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        bundle: String,
        config: TaskConfig,
        env: Arc<Env>,
        registry: WeakRegistry,
    ) -> Self {
        let now = Utc::now();
        let notifier = Notifier::new(id, config.mode);
        let progress = Progress::new(config.file_count());
        Self {
            inner: Arc::new(TaskInner {
                id,
                bundle,
                ctime: now,
                env,
                registry,
                control: tokio::sync::Mutex::new(Control {
                    state: State::Initialized,
                    cancel: None,
                    worker: None,
                    failed_reason: None,
                    paused_reason: None,
                    mtime: now,
                }),
                meter: Mutex::new(Meter {
                    generation: 0,
                    progress,
                    mime_type: None,
                    last_emit: None,
                }),
                limiter: SpeedLimiter::new(None),
                notifier,
                tries: AtomicU32::new(0),
                removed: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Bundle that created the task
    pub fn bundle(&self) -> &str {
        &self.inner.bundle
    }

    /// Normalized configuration the task was created with
    pub fn config(&self) -> &TaskConfig {
        &self.inner.config
    }

    /// Creation time
    pub fn ctime(&self) -> DateTime<Utc> {
        self.inner.ctime
    }

    /// Current state, observed after any control operation in flight
    pub async fn state(&self) -> State {
        self.inner.control.lock().await.state
    }

    /// Latest progress snapshot
    pub fn progress(&self) -> Progress {
        self.inner.meter().progress.clone()
    }

    /// Descriptive metadata of the task
    ///
    /// # Errors
    ///
    /// 21900006 once the task was removed.
    pub async fn query(&self) -> Result<TaskInfo> {
        let control = self.inner.control.lock().await;
        if control.state == State::Removed {
            return Err(Error::TaskNotFound(self.inner.id));
        }
        Ok(self.inner.info(&control))
    }

    /// MIME type reported by the server, empty until a response arrived
    ///
    /// # Errors
    ///
    /// 21900006 once the task was removed.
    pub async fn query_mime_type(&self) -> Result<String> {
        let control = self.inner.control.lock().await;
        if control.state == State::Removed {
            return Err(Error::TaskNotFound(self.inner.id));
        }
        Ok(self.inner.meter().mime_type.clone().unwrap_or_default())
    }
}

impl TaskInner {
    pub(super) fn meter(&self) -> MutexGuard<'_, Meter> {
        self.meter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `generation` still identifies the latest transition
    pub(super) fn is_current(&self, generation: u64) -> bool {
        self.meter().generation == generation
    }

    /// Move to `state` and notify listeners
    ///
    /// The caller holds the control lock. Listeners see a `progress` event
    /// for every externally observable state, followed by `kinds` in order.
    /// Returns the new generation and the published snapshot.
    pub(super) fn transition(
        &self,
        control: &mut Control,
        state: State,
        kinds: &[EventKind],
    ) -> (u64, Progress) {
        let from = control.state;
        control.state = state;
        control.mtime = Utc::now();

        let mut meter = self.meter();
        meter.generation += 1;
        meter.progress.state = state;
        let snapshot = meter.progress.clone();

        if matches!(
            state,
            State::Running | State::Retrying | State::Paused | State::Stopped | State::Removed
        ) {
            self.notifier.emit(EventKind::Progress, snapshot.clone());
        }
        for kind in kinds {
            self.notifier.emit(*kind, snapshot.clone());
        }

        tracing::debug!(task_id = %self.id, %from, to = %state, "Task state changed");
        (meter.generation, snapshot)
    }

    /// Whether byte progress goes out on the agent-wide channel
    pub(super) fn broadcasts_progress(&self) -> bool {
        self.config.mode == Mode::Frontend || self.config.gauge
    }

    fn info(&self, control: &Control) -> TaskInfo {
        let meter = self.meter();
        let progress = meter.progress.clone();
        let total_bytes = if progress.sizes.iter().any(|size| *size < 0) {
            -1
        } else {
            progress.sizes.iter().sum()
        };
        let (file_name, file_path) = match self.config.local_path() {
            Some(path) => (display_name(path), path.display().to_string()),
            None => (String::new(), String::new()),
        };

        TaskInfo {
            download_id: self.id,
            bundle: self.bundle.clone(),
            action: self.config.action,
            mode: self.config.mode,
            title: self.config.title.clone(),
            description: self.config.description.clone(),
            target_uri: self.config.url.clone(),
            file_name,
            file_path,
            status: control.state,
            downloaded_bytes: progress.processed,
            total_bytes,
            mime_type: meter.mime_type.clone().unwrap_or_default(),
            failed_reason: control.failed_reason,
            paused_reason: control.paused_reason,
            tries: self.tries.load(Ordering::SeqCst),
            retry: self.config.retry,
            priority: self.config.priority,
            extras: self.config.extras.clone(),
            ctime: self.ctime,
            mtime: control.mtime,
            progress,
        }
    }

    /// Whether a removal should also delete the partial download
    pub(super) fn leaves_partial_file(&self, state: State) -> bool {
        self.config.action == Action::Download && state != State::Completed
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("bundle", &self.inner.bundle)
            .field("action", &self.inner.config.action)
            .finish_non_exhaustive()
    }
}
