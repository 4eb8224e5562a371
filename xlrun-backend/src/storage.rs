//! On-disk layout of sessions and job workspaces.
//!
//! ```text
//! <data_dir>/sessions/<session_id>/inputs/<file>
//! <data_dir>/sessions/<session_id>/jobs/<job_id>/{job.log, artifacts...}
//! ```

use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;
use xlrun_job_queue::LOG_FILE_NAME;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub use xlrun_jobs::session_inputs_dir;

const MAX_FILENAME_LEN: usize = 200;
/// Suffix of completion sentinels hidden from result listings.
pub const SENTINEL_SUFFIX: &str = "_OK.txt";
/// Download name that bundles the whole workspace.
pub const ARCHIVE_NAME: &str = "all.zip";

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Reduce a client-supplied name to a safe basename.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.replace('\\', "/");
    let base = base.rsplit('/').next().unwrap_or_default();
    let cleaned = UNSAFE_CHARS.replace_all(base, "_");
    let truncated: String = cleaned.chars().take(MAX_FILENAME_LEN).collect();
    match truncated.as_str() {
        "" | "." | ".." => "file".to_string(),
        _ => truncated,
    }
}

/// Lower-cased extension including the leading dot, or an empty string.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn session_dir(data_dir: &Path, session_id: Uuid) -> PathBuf {
    data_dir.join("sessions").join(session_id.to_string())
}

pub fn job_dir(data_dir: &Path, session_id: Uuid, job_id: Uuid) -> PathBuf {
    session_dir(data_dir, session_id)
        .join("jobs")
        .join(job_id.to_string())
}

/// Create the session's `inputs/` and `jobs/` directories.
pub async fn ensure_session_dirs(data_dir: &Path, session_id: Uuid) -> io::Result<PathBuf> {
    let inputs = session_inputs_dir(data_dir, session_id);
    tokio::fs::create_dir_all(&inputs).await?;
    tokio::fs::create_dir_all(session_dir(data_dir, session_id).join("jobs")).await?;
    Ok(inputs)
}

/// Create a job workspace and an empty log file inside it.
pub async fn create_job_dir(data_dir: &Path, session_id: Uuid, job_id: Uuid) -> io::Result<PathBuf> {
    let dir = job_dir(data_dir, session_id, job_id);
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
        .await?;
    Ok(dir)
}

/// A downloadable artifact, relative to its job workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultFile {
    pub filename: String,
    pub size_bytes: u64,
}

/// True for files that are bookkeeping rather than routine output.
pub fn is_hidden_result(filename: &str) -> bool {
    filename == LOG_FILE_NAME || filename.ends_with(SENTINEL_SUFFIX)
}

/// Every result file under `dir`, recursively, sorted by relative path.
pub async fn list_result_files(dir: &Path) -> io::Result<Vec<ResultFile>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let Some(filename) = relative_name(dir, &path) else {
                continue;
            };
            let name_only = entry.file_name().to_string_lossy().into_owned();
            if is_hidden_result(&name_only) {
                continue;
            }
            files.push(ResultFile {
                filename,
                size_bytes: entry.metadata().await?.len(),
            });
        }
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    Some(
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), out)?;
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

/// Deflate every file under `dir` into an in-memory zip.
///
/// Entries are named by their `/`-separated path relative to `dir`, in sorted
/// order. Blocking; call from `spawn_blocking`.
pub fn zip_directory(dir: &Path) -> io::Result<Vec<u8>> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();

    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for path in &files {
        let Some(name) = relative_name(dir, path) else {
            continue;
        };
        writer.start_file(name, options).map_err(io::Error::other)?;
        let mut file = std::fs::File::open(path)?;
        io::copy(&mut file, &mut writer)?;
    }
    Ok(writer.finish().map_err(io::Error::other)?.into_inner())
}

#[derive(Debug, PartialEq, Eq)]
pub enum DownloadPathError {
    /// The requested path escapes the workspace.
    Traversal,
    /// Nothing downloadable exists at the path.
    Missing,
}

/// Resolve `requested` inside `work_dir`, refusing anything that escapes it.
pub async fn resolve_download(work_dir: &Path, requested: &str) -> Result<PathBuf, DownloadPathError> {
    let relative = Path::new(requested);
    let lexically_safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if requested.is_empty() || !lexically_safe {
        return Err(DownloadPathError::Traversal);
    }

    let root = tokio::fs::canonicalize(work_dir)
        .await
        .map_err(|_| DownloadPathError::Missing)?;
    let target = tokio::fs::canonicalize(root.join(relative))
        .await
        .map_err(|_| DownloadPathError::Missing)?;
    // Symlinks may still point outside.
    if !target.starts_with(&root) {
        return Err(DownloadPathError::Traversal);
    }
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_file() => Ok(target),
        _ => Err(DownloadPathError::Missing),
    }
}
