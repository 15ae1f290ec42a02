//! Core types for request-agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a task
///
/// Identifiers are allocated by the registry from a monotonically increasing
/// counter and are never handed out twice, even after the task is removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Direction of a transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Fetch a remote resource into a local file
    Download,
    /// Send local files to a remote endpoint
    Upload,
}

impl Action {
    /// Numeric encoding used by callers that pass enums as integers
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Action::Download),
            1 => Some(Action::Upload),
            _ => None,
        }
    }

    /// Convert Action to its numeric encoding
    pub fn to_u8(&self) -> u8 {
        match self {
            Action::Download => 0,
            Action::Upload => 1,
        }
    }
}

/// Visibility tier of a task
///
/// FRONTEND tasks may subscribe to fine-grained `progress` events, BACKGROUND
/// tasks may not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Background task (default)
    #[default]
    Background,
    /// Foreground task bound to the caller's UI
    Frontend,
}

impl Mode {
    /// Numeric encoding (BACKGROUND = 0, FRONTEND = 1)
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Mode::Background),
            1 => Some(Mode::Frontend),
            _ => None,
        }
    }
}

/// Network constraint for a task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Any network (default)
    #[default]
    Any,
    /// Wi-Fi only
    Wifi,
    /// Cellular only
    Cellular,
}

impl Network {
    /// Numeric encoding (ANY = 0, WIFI = 1, CELLULAR = 2)
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Network::Any),
            1 => Some(Network::Wifi),
            2 => Some(Network::Cellular),
            _ => None,
        }
    }
}

/// HTTP method used for a transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
}

impl Method {
    /// Method name as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }

    /// Default method for an action
    pub fn default_for(action: Action) -> Self {
        match action {
            Action::Download => Method::Get,
            Action::Upload => Method::Post,
        }
    }

    /// Whether the method makes sense for the action
    pub fn allowed_for(&self, action: Action) -> bool {
        match action {
            Action::Download => matches!(self, Method::Get | Method::Post),
            Action::Upload => matches!(self, Method::Post | Method::Put),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        }
    }
}

/// Task lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Created, never started
    Initialized,
    /// Transfer in progress
    Running,
    /// Waiting before another attempt
    Retrying,
    /// Paused by the caller
    Paused,
    /// Stopped by the caller
    Stopped,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
    /// Removed; absorbing
    Removed,
}

impl State {
    /// Convert numeric state code to State
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(State::Initialized),
            0x20 => Some(State::Running),
            0x21 => Some(State::Retrying),
            0x30 => Some(State::Paused),
            0x31 => Some(State::Stopped),
            0x40 => Some(State::Completed),
            0x41 => Some(State::Failed),
            0x50 => Some(State::Removed),
            _ => None,
        }
    }

    /// Convert State to its numeric code
    pub fn to_u8(&self) -> u8 {
        match self {
            State::Initialized => 0x00,
            State::Running => 0x20,
            State::Retrying => 0x21,
            State::Paused => 0x30,
            State::Stopped => 0x31,
            State::Completed => 0x40,
            State::Failed => 0x41,
            State::Removed => 0x50,
        }
    }

    /// A worker owns the task in these states
    pub fn is_active(&self) -> bool {
        matches!(self, State::Running | State::Retrying)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Initialized => "initialized",
            State::Running => "running",
            State::Retrying => "retrying",
            State::Paused => "paused",
            State::Stopped => "stopped",
            State::Completed => "completed",
            State::Failed => "failed",
            State::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Why a task left the running state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Paused, stopped or removed on request
    UserOperation,
    /// The agent was shutting down
    Shutdown,
    /// Could not build the HTTP client
    BuildClientFailed,
    /// Could not build the HTTP request
    BuildRequestFailed,
    /// `precise` was set but the server reported no size
    GetFileSizeFailed,
    /// Connection could not be established
    ConnectError,
    /// Request could not be sent or timed out
    RequestError,
    /// A local upload file could not be read
    UploadFileError,
    /// Too many or disallowed redirects
    RedirectError,
    /// Server answered with an unexpected status
    ProtocolError,
    /// Local I/O failed
    IoError,
    /// A range was required but the server ignored it
    UnsupportedRangeRequest,
    /// Anything else
    OthersError,
}

impl Reason {
    /// Human-readable description
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::UserOperation => "User operation",
            Reason::Shutdown => "The agent is shutting down",
            Reason::BuildClientFailed => "Build client error",
            Reason::BuildRequestFailed => "Build request error",
            Reason::GetFileSizeFailed => {
                "Cannot get the file size from the server while precise is set"
            }
            Reason::ConnectError => "Connect error",
            Reason::RequestError => "Request error",
            Reason::UploadFileError => "There are some files upload failed",
            Reason::RedirectError => "Redirect error",
            Reason::ProtocolError => "Http protocol error",
            Reason::IoError => "Io Error",
            Reason::UnsupportedRangeRequest => "The server is not support range request",
            Reason::OthersError => "Some other error occurred",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress snapshot delivered with every notification
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Task state when the snapshot was taken
    pub state: State,
    /// Index of the file currently being transferred
    pub index: usize,
    /// Bytes transferred for the current run, across all files
    pub processed: u64,
    /// Expected size of each file in bytes, -1 when unknown
    pub sizes: Vec<i64>,
    /// Response metadata such as `etag` and `last-modified`
    pub extras: HashMap<String, String>,
}

impl Progress {
    pub(crate) fn new(files: usize) -> Self {
        Self {
            state: State::Initialized,
            index: 0,
            processed: 0,
            sizes: vec![-1; files.max(1)],
            extras: HashMap::new(),
        }
    }
}

/// Descriptive metadata returned by `query`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Task identifier
    pub download_id: TaskId,
    /// Owning caller's bundle
    pub bundle: String,
    /// Transfer direction
    pub action: Action,
    /// Task mode
    pub mode: Mode,
    /// Title given at creation
    pub title: String,
    /// Description given at creation
    pub description: String,
    /// Remote URL
    #[serde(rename = "targetURI")]
    pub target_uri: String,
    /// Display name of the local file
    pub file_name: String,
    /// Local file path
    pub file_path: String,
    /// Current state
    pub status: State,
    /// Bytes transferred so far
    pub downloaded_bytes: u64,
    /// Total bytes, -1 when unknown
    pub total_bytes: i64,
    /// MIME type reported by the server
    pub mime_type: String,
    /// Why the task failed, if it did
    pub failed_reason: Option<Reason>,
    /// Why the task is paused, if it is
    pub paused_reason: Option<Reason>,
    /// Number of attempts made for the current run
    pub tries: u32,
    /// Whether failed attempts are retried
    pub retry: bool,
    /// Scheduling priority
    pub priority: u32,
    /// Caller-supplied extras
    pub extras: HashMap<String, String>,
    /// Creation time
    pub ctime: DateTime<Utc>,
    /// Last state change
    pub mtime: DateTime<Utc>,
    /// Latest progress snapshot
    pub progress: Progress,
}

/// Search filter for `TaskRegistry::search`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Filter {
    /// Only tasks owned by this bundle (system callers only; others are
    /// always restricted to their own bundle)
    pub bundle: Option<String>,
    /// Only tasks created at or before this time
    pub before: Option<DateTime<Utc>>,
    /// Only tasks created at or after this time
    pub after: Option<DateTime<Utc>>,
    /// Only tasks in this state
    pub state: Option<State>,
    /// Only tasks with this action
    pub action: Option<Action>,
    /// Only tasks with this mode
    pub mode: Option<Mode>,
}

/// Agent-wide event broadcast to `RequestAgent::subscribe` receivers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task registered
    Created {
        /// Task ID
        id: TaskId,
        /// Transfer direction
        action: Action,
    },
    /// Transfer started or restarted
    Started {
        /// Task ID
        id: TaskId,
    },
    /// Byte progress
    Progress {
        /// Task ID
        id: TaskId,
        /// Snapshot
        progress: Progress,
    },
    /// An attempt failed and another one is scheduled
    Retrying {
        /// Task ID
        id: TaskId,
        /// Attempt number that failed (1-based)
        attempt: u32,
        /// Error message of the failed attempt
        error: String,
    },
    /// Task paused
    Paused {
        /// Task ID
        id: TaskId,
    },
    /// Task resumed
    Resumed {
        /// Task ID
        id: TaskId,
    },
    /// Task stopped
    Stopped {
        /// Task ID
        id: TaskId,
    },
    /// Task completed
    Completed {
        /// Task ID
        id: TaskId,
        /// Final snapshot
        progress: Progress,
    },
    /// Task failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Failure reason
        reason: Reason,
        /// Error message
        error: String,
    },
    /// Task removed
    Removed {
        /// Task ID
        id: TaskId,
    },
    /// Agent shutting down
    Shutdown,
}
