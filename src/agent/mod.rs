//! Task agent split into focused submodules.
//!
//! The [`RequestAgent`] owns the task registry and the agent-wide event
//! channel; every created task is handed out as a cloneable [`Task`] handle.
//! - [`task`] - Task handle, shared task state and snapshots
//! - [`control`] - State machine: start, pause, resume, stop, remove
//! - [`worker`] - Transfer worker with retry and progress reporting
//! - [`lifecycle`] - Shutdown coordination

mod control;
mod lifecycle;
mod task;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use task::Task;

use crate::auth::{Authorizer, Caller};
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::registry::TaskRegistry;
use crate::task_config::{self, TaskConfig};
use crate::types::{Event, TaskId};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// State shared by the agent and every task it created
pub(crate) struct Env {
    pub(crate) config: AgentConfig,
    event_tx: broadcast::Sender<Event>,
    /// Cleared once shutdown begins
    accepting_new: AtomicBool,
}

impl Env {
    /// Send an event to all subscribers; dropped when nobody listens
    pub(crate) fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }
}

/// Entry point for creating and managing transfer tasks (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct RequestAgent {
    pub(crate) env: Arc<Env>,
    registry: TaskRegistry,
    /// Client used for the creation-time URL probe
    probe_client: reqwest::Client,
}

impl RequestAgent {
    /// Create an agent
    ///
    /// `authorizer` decides who may use the registry-wide management
    /// operations (`search`, `query`, `remove`, `clear`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the probe HTTP client cannot be built.
    pub fn new(config: AgentConfig, authorizer: Arc<dyn Authorizer>) -> Result<Self> {
        let (event_tx, _rx) = broadcast::channel(config.event_capacity.max(1));
        let probe_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        tracing::info!(
            download_dir = %config.download_dir.display(),
            retry_attempts = config.retry.max_attempts,
            probe = config.probe_on_create,
            "Request agent initialized"
        );

        Ok(Self {
            env: Arc::new(Env {
                config,
                event_tx,
                accepting_new: AtomicBool::new(true),
            }),
            registry: TaskRegistry::new(authorizer),
            probe_client,
        })
    }

    /// Validate `raw` and register a new task owned by `caller`
    ///
    /// The task starts out INITIALIZED; nothing is transferred until
    /// [`Task::start`] is called.
    ///
    /// # Errors
    ///
    /// - 401 when the configuration is structurally invalid
    /// - 13400001 when a local path is outside the caller's sandbox
    /// - 13400003 when the probe shows the URL cannot serve the action, or
    ///   the agent is shutting down
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use request_agent::*;
    /// # use std::sync::Arc;
    /// # async fn example() -> Result<()> {
    /// let agent = RequestAgent::new(AgentConfig::default(), Arc::new(AllowAll))?;
    /// let caller = Caller::new("com.example.app", 100, Sandbox::unrestricted());
    ///
    /// let task = agent
    ///     .create(
    ///         &caller,
    ///         &serde_json::json!({
    ///             "action": 0,
    ///             "url": "https://example.com/archive.tar.gz",
    ///             "saveas": "./archive.tar.gz",
    ///         }),
    ///     )
    ///     .await?;
    /// task.start().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create(&self, caller: &Caller, raw: &Value) -> Result<Task> {
        if !self.env.accepting() {
            return Err(Error::ShuttingDown);
        }

        let config = TaskConfig::parse(raw, &caller.sandbox, &self.env.config.download_dir)?;
        if self.env.config.probe_on_create {
            task_config::probe(&self.probe_client, &config).await?;
        }

        let id = self.registry.allocate_id();
        let action = config.action;
        let task = Task::new(
            id,
            caller.bundle.clone(),
            config,
            self.env.clone(),
            self.registry.downgrade(),
        );
        self.registry.insert(task.clone()).await;

        tracing::info!(
            task_id = %id,
            bundle = %caller.bundle,
            action = ?action,
            url = %task.config().url,
            "Task created"
        );
        self.env.emit(Event::Created { id, action });
        Ok(task)
    }

    /// Handle of a task owned by `caller`
    ///
    /// Tasks of other bundles, and removed tasks, read as missing (21900006).
    pub async fn task(&self, caller: &Caller, id: TaskId) -> Result<Task> {
        self.registry.owned(caller, id).await
    }

    /// The task registry with its authorized management operations
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Subscribe to agent-wide events
    ///
    /// Every subscriber receives all events independently. A subscriber that
    /// falls behind by more than `event_capacity` events gets
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.env.event_tx.subscribe()
    }

    /// The configuration the agent was created with
    pub fn config(&self) -> &AgentConfig {
        &self.env.config
    }
}

impl std::fmt::Debug for RequestAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAgent")
            .field("registry", &self.registry)
            .field("accepting_new", &self.env.accepting())
            .finish_non_exhaustive()
    }
}
