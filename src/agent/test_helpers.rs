//! Shared test helpers for creating RequestAgent instances in tests.

use crate::agent::{RequestAgent, Task};
use crate::auth::{AllowAll, Authorizer, Caller, Sandbox};
use crate::config::{AgentConfig, RetryConfig};
use crate::notify::Listener;
use crate::types::{Progress, State};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// URL nothing listens on; tasks created against it are never started
pub(crate) const UNREACHABLE_URL: &str = "http://127.0.0.1:9/file.bin";

/// Agent plus the temp directory backing its downloads (keep it alive)
pub(crate) struct TestAgent {
    pub(crate) agent: RequestAgent,
    pub(crate) dir: TempDir,
}

impl TestAgent {
    pub(crate) async fn new() -> Self {
        Self::with_authorizer(AllowAll).await
    }

    pub(crate) async fn with_authorizer(authorizer: impl Authorizer + 'static) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let agent = RequestAgent::new(test_config(dir.path()), Arc::new(authorizer)).unwrap();
        Self { agent, dir }
    }

    pub(crate) async fn with_config(configure: impl FnOnce(&mut AgentConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        configure(&mut config);
        let agent = RequestAgent::new(config, Arc::new(AllowAll)).unwrap();
        Self { agent, dir }
    }

    /// Caller confined to the temp directory
    pub(crate) fn caller(&self, bundle: &str) -> Caller {
        Caller::new(bundle, 100, Sandbox::new([self.dir.path()]))
    }

    /// Create a download task; `overrides` is merged into a default config
    pub(crate) async fn download(&self, caller: &Caller, overrides: Value) -> Task {
        let raw = merge(json!({ "action": 0, "url": UNREACHABLE_URL }), overrides);
        self.agent.create(caller, &raw).await.unwrap()
    }

    /// Path inside the temp directory
    pub(crate) fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }
}

/// Fast, offline agent configuration rooted at `dir`
pub(crate) fn test_config(dir: &Path) -> AgentConfig {
    AgentConfig {
        download_dir: dir.to_path_buf(),
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        connect_timeout: Duration::from_secs(2),
        total_timeout: Duration::from_secs(10),
        progress_interval: Duration::ZERO,
        probe_on_create: false,
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Shallow merge of two JSON objects
pub(crate) fn merge(mut base: Value, overrides: Value) -> Value {
    if let (Some(base), Value::Object(overrides)) = (base.as_object_mut(), overrides) {
        base.extend(overrides);
    }
    base
}

/// Listener that records every snapshot it receives
pub(crate) fn recorder() -> (Arc<Mutex<Vec<Progress>>>, Listener) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener = Listener::new(move |progress| sink.lock().unwrap().push(progress.clone()));
    (seen, listener)
}

/// Poll until the task reaches `state`, panicking after five seconds
pub(crate) async fn wait_for_state(task: &Task, state: State) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = task.state().await;
        if current == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {} stuck in {current}, expected {state}",
            task.id()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Let listener dispatchers drain their queues
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
