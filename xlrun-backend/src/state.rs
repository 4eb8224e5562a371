use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;
use xlrun_config::Config;
use xlrun_job_queue::JobQueue;

use crate::storage;

/// An upload batch that jobs can be run against.
#[derive(Debug, Clone)]
pub struct Session {
    pub created_at: DateTime<Utc>,
    pub files: Vec<String>,
    pub total_bytes: u64,
}

/// Shared application state passed to every route handler.
#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    pub job_queue: JobQueue,
    sessions: DashMap<Uuid, Session>,
    data_dir: PathBuf,
}

impl AppState {
    pub fn new(config: Config, job_queue: JobQueue) -> Self {
        let data_dir = PathBuf::from(&config.storage.data_dir);
        Self {
            config,
            job_queue,
            sessions: DashMap::new(),
            data_dir,
        }
    }

    #[inline]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn register_session(&self, session_id: Uuid, session: Session) {
        self.sessions.insert(session_id, session);
    }

    pub fn session(&self, session_id: Uuid) -> Option<Session> {
        self.sessions.get(&session_id).map(|s| s.clone())
    }

    /// Forget sessions created more than `ttl` ago that no registered job
    /// references, and delete their directories. Returns how many went.
    ///
    /// A job submitted for a session in the same instant it is reclaimed fails
    /// at input resolution.
    pub async fn reclaim_idle_sessions(&self, ttl: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };
        let live: HashSet<Uuid> = self
            .job_queue
            .list()
            .await
            .into_iter()
            .map(|job| job.session_id)
            .collect();
        let idle: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| entry.created_at < cutoff && !live.contains(entry.key()))
            .map(|entry| *entry.key())
            .collect();

        let mut removed = 0;
        for session_id in idle {
            if self.sessions.remove(&session_id).is_none() {
                continue;
            }
            let dir = storage::session_dir(&self.data_dir, session_id);
            match xlrun_job_queue::remove_workspace(&dir).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(%session_id, error = %e, "failed to remove idle session directory"),
            }
        }
        if removed > 0 {
            info!(removed, "idle upload sessions reclaimed");
        }
        removed
    }
}

/// Sweep idle sessions every `every` until the task is aborted.
pub async fn run_session_reaper(state: Arc<AppState>, ttl: Duration, every: Duration) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        state.reclaim_idle_sessions(ttl).await;
    }
}
