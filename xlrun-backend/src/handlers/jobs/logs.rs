use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::header;
use axum::response::IntoResponse;

use crate::handlers::utils::job_from_path;
use crate::{error::ApiError, state::AppState};

/// GET /logs/{jobId}
///
/// The log is read as it stands; a running job's log is returned partially.
pub async fn logs(
    Extension(state): Extension<Arc<AppState>>,
    Path(path): Path<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let job = job_from_path(&state, &path).await?;
    let bytes = match tokio::fs::read(job.log_path()).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("log not found"))
        }
        Err(e) => return Err(e.into()),
    };
    let text = String::from_utf8_lossy(&bytes).into_owned();

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}
