//! The single worker that drives queued jobs through their state machine.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::queue::{Popped, WorkQueue};
use crate::registry::JobRegistry;
use crate::runner::JobRunner;

/// Pull IDs off the queue until cancelled or the queue closes.
///
/// A job that is already running when cancellation arrives runs to completion.
pub(crate) async fn run_worker(
    registry: JobRegistry,
    queue: WorkQueue,
    runner: Arc<dyn JobRunner>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    info!("job worker started");
    loop {
        let popped = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            popped = queue.pop(poll_interval) => popped,
        };
        match popped {
            Popped::Job(id) => process_job(&registry, &runner, id).await,
            Popped::TimedOut => continue,
            Popped::Closed => break,
        }
    }
    info!("job worker stopped");
}

/// Run one job and record its terminal state.
pub(crate) async fn process_job(registry: &JobRegistry, runner: &Arc<dyn JobRunner>, id: Uuid) {
    let mut started = false;
    let Some(job) = registry
        .update(id, |job| started = job.mark_running())
        .await
    else {
        debug!(job_id = %id, "dequeued job no longer registered, skipping");
        return;
    };
    if !started {
        warn!(job_id = %id, status = %job.status, "dequeued job was not queued, skipping");
        return;
    }

    info!(job_id = %id, session_id = %job.session_id, "job started");

    let progress = registry.progress(id);
    let task_runner = Arc::clone(runner);
    let task_job = job.clone();
    let handle = tokio::spawn(async move { task_runner.run(&task_job, &progress).await });

    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(join_err) => {
            let task_id = join_err.id();
            let reason = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                join_err.to_string()
            };
            let err = ExecutionError::new(ExecutionErrorKind::Panicked, reason);
            error!(job_id = %id, %task_id, kind = %err.kind(), error = %err, "job runner aborted");
            append_log(
                job.log_path(),
                &format!("\n[ERROR] runner task {task_id} for job {id} aborted\n[ERROR] {err}\n"),
            )
            .await;
            Err(err)
        }
    };

    // Terminal state is recorded on every path above.
    let finished = registry
        .update(id, |job| match &outcome {
            Ok(0) => {
                job.mark_succeeded();
            }
            Ok(code) => {
                job.mark_failed(format!("routine exited with code {code}"));
            }
            Err(e) => {
                job.mark_failed(format!("exit code {}: {e}", e.exit_code()));
            }
        })
        .await;

    match (finished, &outcome) {
        (None, _) => debug!(job_id = %id, "job removed while running; result discarded"),
        (Some(_), Ok(0)) => info!(job_id = %id, "job succeeded"),
        (Some(_), Ok(code)) => warn!(job_id = %id, exit_code = code, "job failed"),
        (Some(_), Err(e)) => warn!(job_id = %id, kind = %e.kind(), error = %e, "job failed"),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Best-effort append; a vanished workspace is not an error here.
async fn append_log(path: &Path, text: &str) {
    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = result {
        debug!(path = %path.display(), %e, "could not append to job log");
    }
}
