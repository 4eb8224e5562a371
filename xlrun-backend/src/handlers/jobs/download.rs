use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Extension, Path};
use axum::http::{header, HeaderValue};
use axum::response::Response;

use crate::handlers::jobs::archive::archive_response;
use crate::handlers::utils::job_from_path;
use crate::storage::{self, DownloadPathError};
use crate::{error::ApiError, state::AppState};

/// GET /download/{jobId}/{*filename}
///
/// `all.zip` is served as an archive of the whole workspace.
pub async fn download(
    Extension(state): Extension<Arc<AppState>>,
    Path(path): Path<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let job = job_from_path(&state, &path).await?;
    let requested = path
        .get("filename")
        .ok_or_else(|| ApiError::bad_request("missing filename path parameter"))?;
    if requested == storage::ARCHIVE_NAME {
        return archive_response(&job).await;
    }

    let target = storage::resolve_download(job.work_dir(), requested)
        .await
        .map_err(|e| match e {
            DownloadPathError::Traversal => {
                tracing::warn!(job_id = %job.id, %requested, "download path rejected");
                ApiError::bad_request("invalid path")
            }
            DownloadPathError::Missing => ApiError::not_found("file not found"),
        })?;

    let bytes = tokio::fs::read(&target).await?;
    let mime = mime_guess::from_path(&target).first_or_octet_stream();
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .map_err(|e| ApiError::Unexpected(e.to_string()))?;

    Response::builder()
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Unexpected(e.to_string()))
}
