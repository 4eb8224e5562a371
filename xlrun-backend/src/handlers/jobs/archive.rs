use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use xlrun_job_queue::Job;

use crate::error::ApiError;
use crate::storage;

/// GET /download/{jobId}/all.zip
///
/// The whole workspace, log included, zipped in memory. Nothing is written to
/// the workspace, so the archive never shows up in the result listing.
pub async fn archive_response(job: &Job) -> Result<Response, ApiError> {
    let work_dir = job.work_dir().to_path_buf();
    if !tokio::fs::try_exists(&work_dir).await.unwrap_or(false) {
        return Err(ApiError::not_found("job workspace not found"));
    }

    let bytes = tokio::task::spawn_blocking(move || storage::zip_directory(&work_dir))
        .await
        .map_err(|e| ApiError::Unexpected(format!("archive task failed: {e}")))??;
    tracing::debug!(job_id = %job.id, size = bytes.len(), "workspace archive built");

    let disposition =
        HeaderValue::from_str(&format!("attachment; filename=\"results_{}.zip\"", job.id))
            .map_err(|e| ApiError::Unexpected(e.to_string()))?;
    Response::builder()
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Unexpected(e.to_string()))
}
