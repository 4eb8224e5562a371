use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;
use xlrun_job_queue::Job;

use crate::{error::ApiError, state::AppState};

/// Look up the job named by the `jobId` path parameter.
///
/// Malformed IDs are reported as not found, like any unknown job.
pub async fn job_from_path(
    state: &Arc<AppState>,
    path: &HashMap<String, String>,
) -> Result<Job, ApiError> {
    let raw = path
        .get("jobId")
        .ok_or_else(|| ApiError::bad_request("missing jobId path parameter"))?;
    let id = Uuid::parse_str(raw).map_err(|_| ApiError::not_found("job not found"))?;
    state
        .job_queue
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found("job not found"))
}
