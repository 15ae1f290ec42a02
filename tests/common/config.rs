//! Test configuration helpers for creating agents and callers

use request_agent::{AgentConfig, AllowAll, Caller, RequestAgent, RetryConfig, Sandbox};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Bundle name used by callers in these tests
pub const TEST_BUNDLE: &str = "com.example.tests";

/// Agent configuration with short delays, rooted at `dir`
///
/// URL probing stays on, so `create` behaves as in production.
pub fn test_config(dir: &TempDir) -> AgentConfig {
    AgentConfig {
        download_dir: dir.path().to_path_buf(),
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
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Create an agent that authorizes everything
///
/// Returns the agent and the tempdir (which must be kept alive).
pub fn create_test_agent() -> (RequestAgent, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let agent = RequestAgent::new(test_config(&dir), Arc::new(AllowAll)).unwrap();
    (agent, dir)
}

/// Caller whose sandbox is the agent's temp directory
pub fn test_caller(dir: &TempDir) -> Caller {
    Caller::new(TEST_BUNDLE, 100, Sandbox::new([dir.path()]))
}
