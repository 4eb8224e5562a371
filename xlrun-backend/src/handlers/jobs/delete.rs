use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// DELETE /jobs/{jobId}
///
/// Only finished jobs can be deleted; queued or running ones answer 409.
pub async fn delete(
    Extension(state): Extension<Arc<AppState>>,
    Path(path): Path<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let id = path
        .get("jobId")
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| ApiError::not_found("job not found"))?;

    let job = state.job_queue.delete(id).await?;
    tracing::info!(job_id = %id, status = %job.status, "job deleted on request");

    Ok(Json(json!({ "deleted": true, "job_id": id })))
}
