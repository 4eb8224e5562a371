//! Job runner trait: the seam the execution adapter plugs into.

use async_trait::async_trait;

use crate::error::ExecutionError;
use crate::registry::JobProgress;
use crate::types::Job;

/// Executes one job's processing routine and produces its exit code.
///
/// Implementations own the job's log file for the duration of the call and
/// must convert their own failures into an [`ExecutionError`] rather than
/// panicking; the worker still contains panics, but reports them as
/// [`ExecutionErrorKind::Panicked`](crate::ExecutionErrorKind::Panicked).
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run `job` to completion. `Ok(0)` means success; any other code is a failure.
    async fn run(&self, job: &Job, progress: &JobProgress) -> Result<i32, ExecutionError>;
}

/// A runner that immediately succeeds.
///
/// This is useful for testing or as a placeholder while the real processing
/// routine is not wired in.
#[derive(Debug, Default, Clone)]
pub struct NoOpRunner;

#[async_trait]
impl JobRunner for NoOpRunner {
    async fn run(&self, _job: &Job, _progress: &JobProgress) -> Result<i32, ExecutionError> {
        Ok(0)
    }
}
