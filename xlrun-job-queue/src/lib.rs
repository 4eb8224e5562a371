//! In-memory job lifecycle engine for the xlrun service.
//!
//! Jobs are accepted through [`JobQueue::enqueue`], run one at a time in strict
//! FIFO order by a single worker, and reclaimed together with their on-disk
//! workspace once they have been finished for longer than the configured TTL.
//!
//! # Architecture
//!
//! - [`JobRegistry`] - Lock-guarded map of job records
//! - [`WorkQueue`] - Unbounded FIFO of job IDs with a bounded-wait `pop`
//! - [`JobRunner`] - Trait the execution adapter implements
//! - [`JobQueue`] - Facade that owns the above and the two background loops
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xlrun_job_queue::{async_trait, ExecutionError, Job, JobProgress, JobQueue, JobRunner, QueueSettings};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl JobRunner for Echo {
//!     async fn run(&self, job: &Job, progress: &JobProgress) -> Result<i32, ExecutionError> {
//!         progress.report(50, "executing").await;
//!         println!("running {}", job.id);
//!         Ok(0)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = JobQueue::new(Arc::new(Echo), QueueSettings::default());
//!     queue.start().unwrap();
//!
//!     let job = Job::new(uuid::Uuid::new_v4(), Default::default(), "/tmp/xlrun/job");
//!     let id = queue.enqueue(job).await.unwrap();
//!     println!("status: {:?}", queue.get(id).await.map(|j| j.status));
//! }
//! ```

mod client;
mod error;
mod queue;
mod reaper;
mod registry;
mod runner;
mod types;
mod worker;

pub use client::{JobQueue, QueueSettings};
pub use error::{ExecutionError, ExecutionErrorKind, JobQueueError};
pub use queue::{Popped, WorkQueue};
pub use reaper::{remove_workspace, ReapReport};
pub use registry::{JobProgress, JobRegistry};
pub use runner::{JobRunner, NoOpRunner};
pub use types::{Job, JobStatus, LOG_FILE_NAME};

// Re-export async_trait for convenience when implementing JobRunner
pub use async_trait::async_trait;
