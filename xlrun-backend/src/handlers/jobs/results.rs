use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use serde_json::{json, Value};

use crate::handlers::utils::job_from_path;
use crate::{error::ApiError, state::AppState, storage};

/// GET /results/{jobId}
pub async fn results(
    Extension(state): Extension<Arc<AppState>>,
    Path(path): Path<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let job = job_from_path(&state, &path).await?;
    let files = match storage::list_result_files(job.work_dir()).await {
        Ok(files) => files,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    let entries: Vec<Value> = files
        .into_iter()
        .map(|f| {
            let download_url = format!("/download/{}/{}", job.id, f.filename);
            json!({
                "filename": f.filename,
                "download_url": download_url,
                "size_bytes": f.size_bytes,
            })
        })
        .collect();
    Ok(Json(Value::Array(entries)))
}
