use std::path::Path;
use std::sync::Arc;

use axum::extract::{Extension, Multipart};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::state::{AppState, Session};
use crate::{error::ApiError, storage};

/// Multipart field carrying the uploaded workbooks.
const FILES_FIELD: &str = "files";

/// POST /upload
///
/// Stores every `files` part under a fresh session's inputs directory.
/// The whole session is discarded if any part is rejected.
pub async fn upload(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let session_id = Uuid::new_v4();
    let inputs_dir = storage::ensure_session_dirs(state.data_dir(), session_id).await?;

    let stored = match store_parts(&state, &inputs_dir, multipart).await {
        Ok((files, _)) if files.is_empty() => Err(ApiError::bad_request("no files uploaded")),
        other => other,
    };
    let (files, total_bytes) = match stored {
        Ok(stored) => stored,
        Err(e) => {
            let dir = storage::session_dir(state.data_dir(), session_id);
            if let Err(cleanup) = xlrun_job_queue::remove_workspace(&dir).await {
                tracing::warn!(%session_id, error = %cleanup, "could not discard rejected upload");
            }
            tracing::warn!(%session_id, error = %e, "upload rejected");
            return Err(e);
        }
    };

    state.register_session(
        session_id,
        Session {
            created_at: Utc::now(),
            files: files.clone(),
            total_bytes,
        },
    );
    tracing::info!(%session_id, files = files.len(), total_bytes, "upload session stored");

    Ok(Json(json!({
        "session_id": session_id,
        "files": files,
        "total_bytes": total_bytes,
    })))
}

async fn store_parts(
    state: &AppState,
    inputs_dir: &Path,
    mut multipart: Multipart,
) -> Result<(Vec<String>, u64), ApiError> {
    let allowed = &state.config.runner.allowed_extensions;
    let max_bytes = state.config.max_upload_bytes();
    let mut files = Vec::new();
    let mut total: u64 = 0;

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        let name = storage::sanitize_filename(field.file_name().unwrap_or("file"));
        let ext = storage::extension_of(&name);
        if !allowed.iter().any(|a| *a == ext) {
            return Err(ApiError::bad_request(format!(
                "extension not allowed: {}",
                if ext.is_empty() { "(none)" } else { ext.as_str() }
            )));
        }

        let mut file = tokio::fs::File::create(inputs_dir.join(&name)).await?;
        while let Some(chunk) = field.chunk().await? {
            total += chunk.len() as u64;
            if total > max_bytes {
                return Err(ApiError::PayloadTooLarge(format!(
                    "total upload size exceeds {} MB",
                    state.config.runner.max_upload_mb
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        files.push(name);
    }
    Ok((files, total))
}
