//! Configuration types for request-agent

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Agent-wide configuration
///
/// Every field has a default, so `AgentConfig::default()` works out of the box
/// and partial JSON documents deserialize cleanly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Directory for downloads whose `saveas` is relative or absent (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Retry behavior for tasks created with `retry: true`
    #[serde(default)]
    pub retry: RetryConfig,

    /// Connection timeout applied when a task does not set one (default: 60 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Total timeout applied when a task does not set one (default: 7 days)
    #[serde(default = "default_total_timeout", with = "duration_serde")]
    pub total_timeout: Duration,

    /// Minimum spacing between byte-level progress notifications (default: 100 ms)
    #[serde(default = "default_progress_interval", with = "millis_serde")]
    pub progress_interval: Duration,

    /// Probe the URL during `create` and reject unsupported resources (default: true)
    #[serde(default = "default_true")]
    pub probe_on_create: bool,

    /// Capacity of the agent-wide event broadcast channel (default: 1024)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Lowest per-task speed limit accepted by `set_max_speed` in bytes per second (default: 16 KiB)
    #[serde(default = "default_min_speed_limit")]
    pub min_speed_limit: u64,

    /// How long `shutdown` waits for workers to wind down (default: 10 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            retry: RetryConfig::default(),
            connect_timeout: default_connect_timeout(),
            total_timeout: default_total_timeout(),
            progress_interval: default_progress_interval(),
            probe_on_create: true,
            event_capacity: default_event_capacity(),
            min_speed_limit: default_min_speed_limit(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Retry configuration for failed transfer attempts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_total_timeout() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_event_capacity() -> usize {
    1024
}

fn default_min_speed_limit() -> u64 {
    16 * 1024
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
