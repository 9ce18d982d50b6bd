use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, StewardErr>;

#[derive(Error, Debug)]
pub enum StewardErr {
    #[error("tool name must not be empty")]
    EmptyToolName,

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Terminal state: a stopped runner rejects every further command.
    #[error("session {0} is stopped")]
    SessionStopped(String),

    /// Back-pressure: the bounded command queue is full. The submitter sees
    /// this directly, nothing is silently dropped.
    #[error("command queue full for session {0}")]
    QueueFull(String),

    #[error("no approval is pending")]
    NoApprovalPending,

    #[error("approval id mismatch: expected {expected}, got {got}")]
    ApprovalMismatch { expected: String, got: String },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Per-tool deadline from the timeout middleware. Deliberately not
    /// retriable: the deadline already consumed the caller's patience.
    #[error("tool call exceeded its {0:?} deadline")]
    ToolDeadline(Duration),

    #[error("operation cancelled")]
    Cancelled,

    /// A transient failure the retry middleware is allowed to consume.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("retry limit reached after {attempts} attempts, last error: {last}")]
    RetryLimit { attempts: u32, last: String },

    #[error("tool panicked: {0}")]
    ToolPanicked(String),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("clone rejected by policy: {0}")]
    ClonePolicy(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("container execution failed: {0}")]
    Container(String),

    #[error(transparent)]
    Patch(#[from] steward_apply_patch::ApplyError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TokioJoin(#[from] JoinError),
}

impl StewardErr {
    /// The default retry predicate: context-independent transient errors
    /// only. A middleware deadline or a cancellation is never worth a second
    /// attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            StewardErr::Transient(_) => true,
            StewardErr::ToolDeadline(_) | StewardErr::Cancelled => false,
            other => {
                let message = other.to_string().to_ascii_lowercase();
                message.contains("timeout")
                    || message.contains("connection refused")
                    || message.contains("temporary failure")
            }
        }
    }
}
