use std::sync::Arc;

use axum::extract::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;
use xlrun_job_queue::Job;

use crate::{error::ApiError, state::AppState, storage};

/// Body of POST /run.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// POST /run
///
/// Creates the job workspace and hands the job to the queue.
pub async fn run(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<RunRequest>,
) -> Result<Json<Value>, ApiError> {
    let (session_id, session) = body
        .session_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .and_then(|id| state.session(id).map(|session| (id, session)))
        .ok_or_else(|| {
            tracing::warn!(session_id = ?body.session_id, "run rejected: unknown session");
            ApiError::bad_request("invalid session_id")
        })?;

    let job_id = Uuid::new_v4();
    let work_dir = storage::create_job_dir(state.data_dir(), session_id, job_id).await?;
    let job = Job::with_id(job_id, session_id, body.options, work_dir);

    if let Err(e) = state.job_queue.enqueue(job).await {
        if let Err(cleanup) = xlrun_job_queue::remove_workspace(&storage::job_dir(
            state.data_dir(),
            session_id,
            job_id,
        ))
        .await
        {
            tracing::warn!(%job_id, error = %cleanup, "could not remove workspace of rejected job");
        }
        return Err(e.into());
    }

    tracing::info!(%job_id, %session_id, inputs = session.files.len(), "job submitted");
    Ok(Json(json!({ "job_id": job_id })))
}
