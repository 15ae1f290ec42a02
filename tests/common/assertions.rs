//! Custom test assertions for integration tests

use request_agent::{ErrorCode, Event, Result, TaskId};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

/// Result of waiting for a task to finish
#[derive(Debug)]
pub enum WaitResult {
    /// Task completed successfully
    Completed,
    /// Task failed with error
    Failed(String),
    /// Timeout waiting for completion
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait for a task to reach a terminal state (Completed or Failed)
///
/// # Arguments
/// * `events` - A receiver subscribed before the task was started
/// * `id` - Task ID to wait for
/// * `timeout` - Maximum time to wait
pub async fn wait_for_completion(
    events: &mut Receiver<Event>,
    id: TaskId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Completed { id: event_id, .. }) if event_id == id => {
                    return WaitResult::Completed;
                }
                Ok(Event::Failed {
                    id: event_id,
                    error,
                    ..
                }) if event_id == id => {
                    return WaitResult::Failed(error);
                }
                Ok(_) => continue,
                Err(_) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Assert that `result` failed with the numeric API `code`
pub fn assert_error_code<T: std::fmt::Debug>(result: Result<T>, code: u32) {
    match result {
        Ok(value) => panic!("expected error {code}, got Ok({value:?})"),
        Err(e) => assert_eq!(e.code(), code, "unexpected error: {e}"),
    }
}
