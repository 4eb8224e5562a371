//! Execution adapter and processing routines for the xlrun job engine.
//!
//! [`ExecutionAdapter`] implements [`JobRunner`](xlrun_job_queue::JobRunner):
//! it resolves a job's session inputs, writes the job log header, and runs the
//! configured routine either in-process (looked up in a [`RoutineRegistry`]) or
//! as a subprocess whose output is streamed into the log.
//!
//! # Routines
//!
//! - `builtin:report` - Summarise the inputs and options into `report.txt`
//!
//! The same routine ships as the `xlrun-report` binary, which accepts the
//! subprocess arguments (`--inputs <json> --out <dir> --options <json>`).
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xlrun_config::Config;
//! use xlrun_job_queue::{JobQueue, QueueSettings};
//! use xlrun_jobs::{builtin_routines, ExecutionAdapter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let adapter = ExecutionAdapter::from_config(&config, builtin_routines())?;
//!     let queue = JobQueue::new(Arc::new(adapter), QueueSettings::default());
//!     queue.start()?;
//!     Ok(())
//! }
//! ```

mod adapter;
mod error;
mod inputs;
mod report;
mod routine;

pub use adapter::{subprocess_argv, ExecutionAdapter};
pub use error::RoutineError;
pub use inputs::{session_inputs_dir, DirectoryInputs, InputResolver};
pub use report::{ReportRoutine, MISSING_INPUTS_FILE, OK_SENTINEL_FILE};
pub use routine::{ProcessingRoutine, RoutineRegistry};

/// Register every routine shipped with this crate.
pub fn register_builtin_routines(registry: &mut RoutineRegistry) {
    registry.register(routine_ids::REPORT, ReportRoutine::new());
}

/// A registry holding only the bundled routines.
pub fn builtin_routines() -> RoutineRegistry {
    let mut registry = RoutineRegistry::new();
    register_builtin_routines(&mut registry);
    registry
}

/// Routine identifier constants for type-safe references.
pub mod routine_ids {
    pub const REPORT: &str = "builtin:report";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_entrypoint_is_registered() {
        let registry = builtin_routines();
        let default_entrypoint = xlrun_config::Config::default().runner.entrypoint;
        assert!(registry.contains(&default_entrypoint));
        assert_eq!(registry.ids(), vec![routine_ids::REPORT]);
    }
}
