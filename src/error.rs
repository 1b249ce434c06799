use std::path::PathBuf;

use thiserror::Error;

/// Status code the queue uses when a task's run was reclaimed, expired or
/// already resolved by someone else.
pub const CONFLICT_STATUS: u16 = 409;

/// Rejection returned by the queue service.
///
/// `Conflict` is an expected outcome when racing lease expiry and is handled
/// by normal branching; every other variant is fatal to the task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Queue rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Queue transport error: {0}")]
    Transport(String),
}

impl QueueError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == CONFLICT_STATUS {
            QueueError::Conflict(message)
        } else {
            QueueError::Rejected { status, message }
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, QueueError::Conflict(_))
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Failure of a single artifact upload attempt.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Bad status {status}")]
    BadStatus { status: u16 },

    #[error("Upload timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not create artifact: {0}")]
    Queue(#[from] QueueError),

    #[error("Upload task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl UploadError {
    /// Only unexpected transfer statuses are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::BadStatus { .. })
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Task script is empty")]
    EmptyCommand,

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("A process is already running for this task (pid {0})")]
    ProcessAlreadyRunning(i32),

    #[error("Failed to open log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
