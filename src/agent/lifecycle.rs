//! Shutdown coordination.

use super::RequestAgent;
use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;

impl RequestAgent {
    /// Gracefully shut down the agent
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new tasks and new runs (`create`, `start` and
    ///    `resume` fail with 13400003 from now on)
    /// 2. Pauses every RUNNING or RETRYING task with reason `Shutdown`, keeping
    ///    partial downloads
    /// 3. Waits up to `shutdown_timeout` for the workers to wind down
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Calling it again is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.env.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new tasks");

        let mut workers = Vec::new();
        for task in self.registry().all().await {
            if let Some(worker) = task.interrupt_for_shutdown().await {
                workers.push(worker);
            }
        }
        tracing::info!(active = workers.len(), "Signaled active tasks to pause");

        let wait = futures::future::join_all(workers);
        match tokio::time::timeout(self.env.config.shutdown_timeout, wait).await {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    tracing::warn!(panicked, "Some workers ended abnormally during shutdown");
                } else {
                    tracing::info!("All workers finished");
                }
            }
            Err(_) => {
                tracing::warn!("Timeout waiting for workers to finish, proceeding with shutdown");
            }
        }

        self.env.emit(Event::Shutdown);
        tracing::info!("Shutdown complete");
        Ok(())
    }

    /// Whether the agent still accepts new tasks
    pub fn is_accepting(&self) -> bool {
        self.env.accepting()
    }
}
