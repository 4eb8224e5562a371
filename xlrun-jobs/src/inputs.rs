//! Session input discovery.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;
use xlrun_job_queue::{ExecutionError, ExecutionErrorKind};

/// Directory holding one session's uploaded inputs.
pub fn session_inputs_dir(data_dir: &Path, session_id: Uuid) -> PathBuf {
    data_dir
        .join("sessions")
        .join(session_id.to_string())
        .join("inputs")
}

/// Produces the input files a job of the given session should process.
#[async_trait]
pub trait InputResolver: Send + Sync {
    /// Accepted input paths, sorted.
    async fn resolve(&self, session_id: Uuid) -> Result<Vec<PathBuf>, ExecutionError>;
}

/// Lists `<data_dir>/sessions/<session>/inputs`, keeping accepted extensions.
#[derive(Debug, Clone)]
pub struct DirectoryInputs {
    data_dir: PathBuf,
    extensions: Vec<String>,
}

impl DirectoryInputs {
    /// `extensions` are compared case-insensitively and may omit the leading dot.
    pub fn new(data_dir: impl Into<PathBuf>, extensions: &[String]) -> Self {
        let extensions = extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self {
            data_dir: data_dir.into(),
            extensions,
        }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }
}

#[async_trait]
impl InputResolver for DirectoryInputs {
    async fn resolve(&self, session_id: Uuid) -> Result<Vec<PathBuf>, ExecutionError> {
        let dir = session_inputs_dir(&self.data_dir, session_id);
        let resolution_error = |e: io::Error| {
            ExecutionError::new(
                ExecutionErrorKind::InputResolution,
                format!("cannot list {}: {e}", dir.display()),
            )
        };

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(resolution_error)?;
        let mut inputs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(resolution_error)? {
            let path = entry.path();
            let is_file = entry.file_type().await.map_err(resolution_error)?.is_file();
            if is_file && self.accepts(&path) {
                inputs.push(path);
            }
        }
        inputs.sort();
        Ok(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_accepted_files_sorted() {
        let root = tempfile::tempdir().unwrap();
        let session = Uuid::new_v4();
        let dir = session_inputs_dir(root.path(), session);
        std::fs::create_dir_all(dir.join("nested.xlsx")).unwrap();
        for name in ["b.xlsx", "A.XLSX", "notes.txt", "c.xlsm"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let resolver = DirectoryInputs::new(root.path(), &[".xlsx".to_string(), "XLSM".to_string()]);
        let names: Vec<String> = resolver
            .resolve(session)
            .await
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["A.XLSX", "b.xlsx", "c.xlsm"]);
    }

    #[tokio::test]
    async fn missing_session_directory_is_an_input_error() {
        let root = tempfile::tempdir().unwrap();
        let resolver = DirectoryInputs::new(root.path(), &[".xlsx".to_string()]);
        let err = resolver.resolve(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ExecutionErrorKind::InputResolution);
    }
}
