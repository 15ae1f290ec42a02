//! Error types for request-agent
//!
//! This module provides the error taxonomy of the library:
//! - [`Error`] for every fallible public operation, each variant carrying the
//!   numeric API code callers match on (see [`ErrorCode`])
//! - [`TransferError`] for failures inside a single transfer attempt, which
//!   carry a [`Reason`] and are classified as retryable or not

use crate::types::{Reason, State, TaskId};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for request-agent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for request-agent
#[derive(Debug, Error)]
pub enum Error {
    /// Structurally invalid configuration or argument (401)
    #[error("parameter error: {message}")]
    Parameter {
        /// What was wrong
        message: String,
        /// The offending field, if one can be named
        field: Option<String>,
    },

    /// Caller lacks the app-level permission (201)
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Caller is not a system application (202)
    #[error("not a system application: {0}")]
    NotSystemApp(String),

    /// Local path is missing or outside the caller's sandbox (13400001)
    #[error("file access denied for {path}: {reason}")]
    FileAccessDenied {
        /// The rejected path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// Remote resource does not support the requested action (13400003)
    #[error("resource {url} does not support {action}: {reason}")]
    ResourceUnsupported {
        /// The probed URL
        url: String,
        /// "download" or "upload"
        action: String,
        /// What the probe observed
        reason: String,
    },

    /// Operation not available for the task's mode (21900005)
    #[error("operation {operation} not supported in {mode} mode")]
    UnsupportedOperation {
        /// The attempted operation
        operation: String,
        /// The task's mode
        mode: String,
    },

    /// Task does not exist or was removed (21900006)
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    /// Operation not valid in the task's current state (21900007)
    #[error("cannot {operation} task {id} in state {state}")]
    InvalidState {
        /// The task ID
        id: TaskId,
        /// The attempted operation (e.g. "pause")
        operation: String,
        /// The state that prevents it
        state: State,
    },

    /// A transfer attempt failed
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error outside of a transfer attempt
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,
}

impl Error {
    /// Build a parameter error for a named field
    pub fn parameter(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Parameter {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

/// Failure of a single transfer attempt
#[derive(Debug, Error)]
pub enum TransferError {
    /// The HTTP client could not be configured
    #[error("failed to build HTTP client: {0}")]
    BuildClient(String),

    /// Could not connect to the remote host
    #[error("connect failed: {0}")]
    Connect(String),

    /// Request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Sending the request or reading the body failed
    #[error("request failed: {0}")]
    Request(String),

    /// Redirect policy violated
    #[error("redirect failed: {0}")]
    Redirect(String),

    /// Server answered with a non-success status
    #[error("server responded with HTTP {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// A partial response started somewhere other than the requested offset
    #[error("server does not support range requests")]
    UnsupportedRange,

    /// Server did not report a size while `precise` is set
    #[error("server did not report a content length")]
    UnknownSize,

    /// A local upload file could not be read or sliced
    #[error("upload file {path} unusable: {reason}")]
    UploadFile {
        /// The file path
        path: PathBuf,
        /// Why it could not be used
        reason: String,
    },

    /// Local I/O failure while writing or reading
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// The task-level reason recorded for this failure
    pub fn reason(&self) -> Reason {
        match self {
            TransferError::BuildClient(_) => Reason::BuildClientFailed,
            TransferError::Connect(_) => Reason::ConnectError,
            TransferError::Timeout(_) | TransferError::Request(_) => Reason::RequestError,
            TransferError::Redirect(_) => Reason::RedirectError,
            TransferError::Status { .. } => Reason::ProtocolError,
            TransferError::UnsupportedRange => Reason::UnsupportedRangeRequest,
            TransferError::UnknownSize => Reason::GetFileSizeFailed,
            TransferError::UploadFile { .. } => Reason::UploadFileError,
            TransferError::Io(_) => Reason::IoError,
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            TransferError::Connect(e.to_string())
        } else if e.is_timeout() {
            TransferError::Timeout(e.to_string())
        } else if e.is_redirect() {
            TransferError::Redirect(e.to_string())
        } else if let Some(status) = e.status() {
            TransferError::Status {
                status: status.as_u16(),
            }
        } else {
            TransferError::Request(e.to_string())
        }
    }
}

/// Numeric API codes exposed to callers
///
/// Codes follow the request service's public contract: 201/202 for missing
/// grants, 401 for parameter errors, 134000xx for file and service errors,
/// 219000xx for task-level errors.
pub trait ErrorCode {
    /// Get the numeric API code for this error
    fn code(&self) -> u32;
}

/// Parameter error
pub const CODE_PARAMETER: u32 = 401;
/// Missing app-level permission
pub const CODE_PERMISSION: u32 = 201;
/// Caller is not a system app
pub const CODE_SYSTEM_API: u32 = 202;
/// File operation error
pub const CODE_FILE_OPERATION: u32 = 13400001;
/// Service or resource error
pub const CODE_SERVICE: u32 = 13400003;
/// Operation disallowed for the task's mode
pub const CODE_TASK_MODE: u32 = 21900005;
/// Task not found
pub const CODE_TASK_NOT_FOUND: u32 = 21900006;
/// Operation disallowed for the task's state
pub const CODE_TASK_STATE: u32 = 21900007;

impl ErrorCode for Error {
    fn code(&self) -> u32 {
        match self {
            Error::Parameter { .. } => CODE_PARAMETER,
            Error::PermissionDenied(_) => CODE_PERMISSION,
            Error::NotSystemApp(_) => CODE_SYSTEM_API,
            Error::FileAccessDenied { .. } => CODE_FILE_OPERATION,
            Error::ResourceUnsupported { .. } => CODE_SERVICE,
            Error::UnsupportedOperation { .. } => CODE_TASK_MODE,
            Error::TaskNotFound(_) => CODE_TASK_NOT_FOUND,
            Error::InvalidState { .. } => CODE_TASK_STATE,
            Error::Transfer(_) | Error::Io(_) | Error::Network(_) => CODE_SERVICE,
            Error::ShuttingDown => CODE_SERVICE,
        }
    }
}
