//! Core types for the job lifecycle engine.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// File name of the per-job execution log inside its work directory.
pub const LOG_FILE_NAME: &str = "job.log";

/// Status of a job. Advances `Queued -> Running -> Succeeded | Failed` and never reverts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Returns true if this status represents a terminal state.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

/// One scheduled execution of the processing routine against a session's inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub session_id: Uuid,
    pub status: JobStatus,
    /// Advisory 0..=100; never decreases once running.
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Passed verbatim to the processing routine.
    pub options: Map<String, Value>,
    /// Exclusive directory for the log and the routine's outputs.
    pub work_dir: PathBuf,
    pub log_path: PathBuf,
}

impl Job {
    /// Create a queued job whose workspace is `work_dir`.
    ///
    /// The directory itself is created by the caller before the job is enqueued.
    pub fn new(session_id: Uuid, options: Map<String, Value>, work_dir: impl Into<PathBuf>) -> Self {
        Self::with_id(Uuid::new_v4(), session_id, options, work_dir)
    }

    /// Create a queued job with a specific ID.
    pub fn with_id(
        id: Uuid,
        session_id: Uuid,
        options: Map<String, Value>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        let work_dir = work_dir.into();
        let log_path = work_dir.join(LOG_FILE_NAME);
        Self {
            id,
            session_id,
            status: JobStatus::Queued,
            progress: 0,
            message: "queued".to_string(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            options,
            work_dir,
            log_path,
        }
    }

    #[inline]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    #[inline]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// `Queued -> Running`. Returns false if the job was not queued.
    pub fn mark_running(&mut self) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.progress = 5;
        self.message = "preparing".to_string();
        true
    }

    /// Record an advisory checkpoint. Ignored unless the job is running.
    pub fn report_progress(&mut self, progress: u8, message: impl Into<String>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.progress = self.progress.max(progress.min(100));
        self.message = message.into();
        true
    }

    /// `Running -> Succeeded`. Returns false if the job was not running.
    pub fn mark_succeeded(&mut self) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Succeeded;
        self.progress = 100;
        self.message = "completed".to_string();
        self.finished_at = Some(Utc::now());
        true
    }

    /// `Running -> Failed`. Returns false if the job was not running.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Failed;
        self.progress = 100;
        self.message = message.into();
        self.finished_at = Some(Utc::now());
        true
    }
}
