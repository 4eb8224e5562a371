//! Routine execution errors.

use thiserror::Error;

/// Errors a processing routine may report instead of an exit code.
#[derive(Debug, Error)]
pub enum RoutineError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("routine unavailable: {0}")]
    Unavailable(String),

    #[error("processing failed: {0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
