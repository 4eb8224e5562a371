//! In-memory job registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::Job;

/// Thread-safe map from job ID to the canonical job record.
///
/// Every access is a short critical section; no I/O happens while the lock is held.
/// Readers get clones, so a returned `Job` is a snapshot.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &"<RwLock<HashMap<Uuid, Job>>>")
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by ID.
    pub async fn put(&self, job: Job) {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job);
    }

    /// Get a snapshot of a job.
    pub async fn get(&self, id: Uuid) -> Option<Job> {
        let jobs = self.jobs.read().await;
        jobs.get(&id).cloned()
    }

    /// Atomically remove and return a job.
    pub async fn delete(&self, id: Uuid) -> Option<Job> {
        let mut jobs = self.jobs.write().await;
        jobs.remove(&id)
    }

    /// Remove a job only if `predicate` holds for it.
    ///
    /// Returns `Err(snapshot)` when the job exists but the predicate rejected it.
    pub async fn delete_if(
        &self,
        id: Uuid,
        predicate: impl FnOnce(&Job) -> bool,
    ) -> Option<Result<Job, Job>> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get(&id)?;
        if predicate(job) {
            jobs.remove(&id).map(Ok)
        } else {
            Some(Err(job.clone()))
        }
    }

    /// Mutate a job in place under the write lock and return the updated snapshot.
    pub async fn update<F>(&self, id: Uuid, f: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id)?;
        f(job);
        Some(job.clone())
    }

    /// IDs of jobs whose `finished_at` is set and strictly earlier than `cutoff`.
    pub async fn list_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        let jobs = self.jobs.read().await;
        jobs.values()
            .filter(|job| job.finished_at.is_some_and(|finished| finished < cutoff))
            .map(|job| job.id)
            .collect()
    }

    /// Snapshot of all jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by_key(|job| job.created_at);
        all
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Progress handle for one job.
    pub fn progress(&self, id: Uuid) -> JobProgress {
        JobProgress {
            registry: self.clone(),
            id,
        }
    }
}

/// Lets the execution adapter post checkpoints for the job it is running.
#[derive(Debug, Clone)]
pub struct JobProgress {
    registry: JobRegistry,
    id: Uuid,
}

impl JobProgress {
    /// Update `progress`/`message`. A no-op if the job is gone or no longer running.
    pub async fn report(&self, progress: u8, message: impl Into<String>) {
        let message = message.into();
        self.registry
            .update(self.id, |job| {
                job.report_progress(progress, message);
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;
    use serde_json::Map;

    fn job() -> Job {
        Job::new(Uuid::new_v4(), Map::new(), "/tmp/xlrun/registry")
    }

    #[tokio::test]
    async fn put_get_delete() {
        let registry = JobRegistry::new();
        let job = job();
        let id = job.id;
        registry.put(job).await;

        assert_eq!(registry.get(id).await.map(|j| j.id), Some(id));
        assert_eq!(registry.delete(id).await.map(|j| j.id), Some(id));
        assert!(registry.get(id).await.is_none());
        assert!(registry.delete(id).await.is_none());
    }

    #[tokio::test]
    async fn list_finished_before_only_returns_expired_terminal_jobs() {
        let registry = JobRegistry::new();

        let queued = job();
        let mut finished = job();
        finished.mark_running();
        finished.mark_succeeded();
        let finished_id = finished.id;
        let finished_at = finished.finished_at.unwrap();

        registry.put(queued).await;
        registry.put(finished).await;

        assert!(registry.list_finished_before(finished_at).await.is_empty());
        let later = finished_at + chrono::Duration::milliseconds(1);
        assert_eq!(registry.list_finished_before(later).await, vec![finished_id]);
    }

    #[tokio::test]
    async fn delete_if_keeps_rejected_jobs() {
        let registry = JobRegistry::new();
        let job = job();
        let id = job.id;
        registry.put(job).await;

        let rejected = registry
            .delete_if(id, |j| j.status.is_terminal())
            .await
            .expect("job exists");
        assert!(rejected.is_err());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn progress_handle_updates_running_job() {
        let registry = JobRegistry::new();
        let mut job = job();
        job.mark_running();
        let id = job.id;
        registry.put(job).await;

        registry.progress(id).report(50, "executing").await;
        let snapshot = registry.get(id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Running);
        assert_eq!(snapshot.progress, 50);
        assert_eq!(snapshot.message, "executing");
    }
}
