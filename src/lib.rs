//! # request-agent
//!
//! Background upload/download task manager for embedding in services.
//!
//! ## Design Philosophy
//!
//! request-agent is designed to be:
//! - **Strictly validated** - Loose JSON task configurations are coerced into a typed
//!   [`TaskConfig`] or rejected with a numeric error code
//! - **Controllable** - Every task is a state machine driven by `start`, `pause`,
//!   `resume`, `stop` and `remove`, safe to call back to back
//! - **Resilient** - Transient failures are retried with exponential backoff, partial
//!   downloads are resumed with HTTP ranges
//! - **Event-driven** - Per-task listeners and an agent-wide broadcast channel, no
//!   polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use request_agent::{AgentConfig, AllowAll, Caller, Listener, RequestAgent, Sandbox};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let agent = RequestAgent::new(AgentConfig::default(), Arc::new(AllowAll))?;
//!     let caller = Caller::new("com.example.app", 100, Sandbox::new(["./downloads"]));
//!
//!     // Subscribe to agent-wide events
//!     let mut events = agent.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let task = agent
//!         .create(
//!             &caller,
//!             &serde_json::json!({
//!                 "action": "download",
//!                 "url": "https://example.com/file.iso",
//!                 "mode": "frontend",
//!             }),
//!         )
//!         .await?;
//!     task.on("progress", Listener::new(|p| println!("{} bytes", p.processed)))?;
//!     task.start().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Task agent: creation, control and shutdown
pub mod agent;
/// Caller identity, file sandbox and authorization
pub mod auth;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Per-task event listeners
pub mod notify;
/// Task registry and management operations
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Speed limiting with token bucket
pub mod speed_limiter;
/// Task configuration validation
pub mod task_config;
/// Transfer executor (crate-internal)
pub(crate) mod transfer;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use agent::{RequestAgent, Task};
pub use auth::{AllowAll, Authorizer, Caller, Grant, Sandbox, StaticAuthorizer};
pub use config::{AgentConfig, RetryConfig};
pub use error::{Error, ErrorCode, Result, TransferError};
pub use notify::{EventKind, Listener};
pub use registry::TaskRegistry;
pub use task_config::{FileSpec, FormField, TaskConfig};
pub use types::{
    Action, Event, Filter, Method, Mode, Network, Progress, Reason, State, TaskId, TaskInfo,
};

/// Helper function to run the agent with graceful signal handling.
///
/// Waits for a termination signal and then calls the agent's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use request_agent::{AgentConfig, AllowAll, RequestAgent, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let agent = RequestAgent::new(AgentConfig::default(), Arc::new(AllowAll))?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(agent).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(agent: RequestAgent) -> Result<()> {
    wait_for_signal().await;
    agent.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
