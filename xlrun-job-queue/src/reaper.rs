//! Time-based reclamation of finished jobs and their workspaces.

use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::registry::JobRegistry;

/// Result of one reclamation tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Jobs evicted from the registry.
    pub removed: usize,
    /// Evicted jobs whose workspace could not be deleted.
    pub failed: usize,
}

/// Remove a workspace directory tree. A missing directory counts as success.
pub async fn remove_workspace(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Evict every job that finished more than `ttl` ago and delete its workspace.
///
/// One job's deletion failure does not stop the scan.
pub async fn reap_expired(registry: &JobRegistry, ttl: Duration) -> ReapReport {
    let mut report = ReapReport::default();
    let Some(cutoff) = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
    else {
        return report;
    };

    let expired = registry.list_finished_before(cutoff).await;
    for id in expired {
        let Some(job) = registry.delete(id).await else {
            // Already gone: deleted explicitly or by an earlier tick.
            continue;
        };
        report.removed += 1;
        match remove_workspace(job.work_dir()).await {
            Ok(()) => debug!(job_id = %id, "reclaimed expired job"),
            Err(e) => {
                report.failed += 1;
                error!(
                    job_id = %id,
                    work_dir = %job.work_dir().display(),
                    %e,
                    "failed to delete job workspace"
                );
            }
        }
    }
    report
}

/// Run [`reap_expired`] every `interval` until cancelled.
pub(crate) async fn run_reaper(
    registry: JobRegistry,
    ttl: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        ttl_secs = ttl.as_secs(),
        interval_secs = interval.as_secs(),
        "job reaper started"
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Each tick runs in its own task so a fault never ends the loop.
        let tick_registry = registry.clone();
        match tokio::spawn(async move { reap_expired(&tick_registry, ttl).await }).await {
            Ok(report) if report.removed > 0 => info!(
                removed = report.removed,
                failed = report.failed,
                "reclaimed expired jobs"
            ),
            Ok(_) => {}
            Err(e) => error!(%e, "reclamation tick aborted"),
        }
    }
    info!("job reaper stopped");
}
