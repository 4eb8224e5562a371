use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use serde_json::{json, Value};

use crate::handlers::utils::job_from_path;
use crate::{error::ApiError, state::AppState};

/// GET /status/{jobId}
pub async fn status(
    Extension(state): Extension<Arc<AppState>>,
    Path(path): Path<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let job = job_from_path(&state, &path).await?;

    Ok(Json(json!({
        "job_id": job.id,
        "session_id": job.session_id,
        "status": job.status,
        "progress": job.progress,
        "message": job.message,
        "created_at": job.created_at.to_rfc3339(),
        "started_at": job.started_at.map(|dt| dt.to_rfc3339()),
        "finished_at": job.finished_at.map(|dt| dt.to_rfc3339()),
    })))
}
