//! Job queue facade: the one object handed to callers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::JobQueueError;
use crate::queue::WorkQueue;
use crate::reaper::{self, ReapReport};
use crate::registry::JobRegistry;
use crate::runner::JobRunner;
use crate::types::{Job, JobStatus};
use crate::worker;

/// Timing knobs for the background loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// How long a finished job is kept before reclamation.
    pub ttl: Duration,
    /// Period of the reclamation loop.
    pub reap_interval: Duration,
    /// Bounded wait of the worker between shutdown checks.
    pub poll_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120 * 60),
            reap_interval: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl QueueSettings {
    /// Both loop periods must be non-zero.
    pub fn validate(&self) -> Result<(), JobQueueError> {
        if self.reap_interval.is_zero() {
            return Err(JobQueueError::InvalidSettings("reap_interval must be > 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(JobQueueError::InvalidSettings("poll_interval must be > 0"));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

struct Inner {
    registry: JobRegistry,
    queue: WorkQueue,
    runner: Arc<dyn JobRunner>,
    settings: QueueSettings,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Registry + FIFO queue + single worker + reclamation loop.
///
/// Cloning is cheap and shares the same engine.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("settings", &self.inner.settings)
            .field("started", &self.inner.started.load(Ordering::SeqCst))
            .field("pending", &self.inner.queue.len())
            .finish()
    }
}

impl JobQueue {
    pub fn new(runner: Arc<dyn JobRunner>, settings: QueueSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: JobRegistry::new(),
                queue: WorkQueue::new(),
                runner,
                settings,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    #[inline]
    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    /// Spawn the worker and reclamation loops. Must be called inside a tokio runtime.
    ///
    /// A second call returns [`JobQueueError::AlreadyStarted`]. Zero loop periods
    /// are refused with [`JobQueueError::InvalidSettings`] and nothing is spawned.
    pub fn start(&self) -> Result<(), JobQueueError> {
        self.inner.settings.validate()?;
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(JobQueueError::AlreadyStarted);
        }
        if self.inner.cancel.is_cancelled() {
            return Err(JobQueueError::Closed);
        }

        let settings = self.inner.settings;
        let worker = tokio::spawn(worker::run_worker(
            self.inner.registry.clone(),
            self.inner.queue.clone(),
            Arc::clone(&self.inner.runner),
            settings.poll_interval,
            self.inner.cancel.child_token(),
        ));
        let reaper = tokio::spawn(reaper::run_reaper(
            self.inner.registry.clone(),
            settings.ttl,
            settings.reap_interval,
            self.inner.cancel.child_token(),
        ));

        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tasks.push(worker);
        tasks.push(reaper);
        info!("job queue started");
        Ok(())
    }

    /// Register a queued job and schedule it behind everything already enqueued.
    pub async fn enqueue(&self, job: Job) -> Result<Uuid, JobQueueError> {
        if job.status != JobStatus::Queued {
            return Err(JobQueueError::InvalidState {
                id: job.id,
                status: job.status,
            });
        }
        if self.inner.cancel.is_cancelled() {
            return Err(JobQueueError::Closed);
        }

        let id = job.id;
        let session_id = job.session_id;
        self.inner.registry.put(job).await;
        if let Err(e) = self.inner.queue.push(id) {
            self.inner.registry.delete(id).await;
            return Err(e);
        }

        info!(job_id = %id, %session_id, pending = self.inner.queue.len(), "job enqueued");
        Ok(id)
    }

    /// Snapshot of a job, or `None` once it has been deleted or reclaimed.
    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.inner.registry.get(id).await
    }

    /// All known jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        self.inner.registry.list().await
    }

    /// Number of jobs waiting for the worker.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Delete a finished job and its workspace.
    ///
    /// Jobs that are still queued or running are refused with
    /// [`JobQueueError::JobActive`] and left untouched.
    pub async fn delete(&self, id: Uuid) -> Result<Job, JobQueueError> {
        let job = match self
            .inner
            .registry
            .delete_if(id, |job| job.status.is_terminal())
            .await
        {
            None => return Err(JobQueueError::NotFound(id)),
            Some(Err(_)) => return Err(JobQueueError::JobActive(id)),
            Some(Ok(job)) => job,
        };
        reaper::remove_workspace(job.work_dir()).await?;
        info!(job_id = %id, "job deleted");
        Ok(job)
    }

    /// Run one reclamation pass now.
    pub async fn reap_expired(&self) -> ReapReport {
        reaper::reap_expired(&self.inner.registry, self.inner.settings.ttl).await
    }

    /// Stop both loops and wait for them. A job already running is allowed to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.queue.close().await;

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                error!(%e, "job queue task ended abnormally");
            }
        }
        info!("job queue stopped");
    }
}
