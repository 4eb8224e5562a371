//! Error types for the job queue system.

use thiserror::Error;
use uuid::Uuid;

use crate::types::JobStatus;

/// Errors that may occur while interacting with the job queue.
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job {0} has not finished yet")]
    JobActive(Uuid),

    #[error("job {id} must be queued to be enqueued, found {status}")]
    InvalidState { id: Uuid, status: JobStatus },

    #[error("job queue has already been started")]
    AlreadyStarted,

    #[error("invalid queue settings: {0}")]
    InvalidSettings(&'static str),

    #[error("job queue has been shut down")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Category of an execution failure, carried across the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    /// Inputs for the session could not be listed.
    InputResolution,
    /// No routine is registered under the configured identifier.
    RoutineLookup,
    /// The routine's preparation ("import") stage failed.
    RoutinePrepare,
    /// The routine reported an error instead of an exit code.
    RoutineFailed,
    /// The child process could not be spawned or awaited.
    Launch,
    /// Log or workspace I/O failed.
    Io,
    /// The routine or adapter panicked.
    Panicked,
}

impl ExecutionErrorKind {
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::InputResolution => "input resolution",
            Self::RoutineLookup => "routine lookup",
            Self::RoutinePrepare => "routine prepare",
            Self::RoutineFailed => "routine failed",
            Self::Launch => "launch",
            Self::Io => "io",
            Self::Panicked => "panicked",
        }
    }
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A failure that prevented a job's routine from producing an exit code.
///
/// Always maps to exit code 1.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    kind: ExecutionErrorKind,
    message: String,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[inline]
    pub fn io(err: std::io::Error) -> Self {
        Self::new(ExecutionErrorKind::Io, err.to_string())
    }

    #[inline]
    pub fn kind(&self) -> ExecutionErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The exit code this failure is reported as.
    #[inline]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}
