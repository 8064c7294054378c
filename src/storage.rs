//! Working directories and per-request file naming
//!
//! Every request gets a fresh [`JobToken`]; its input and output file names
//! are derived from it, so concurrent requests sharing the directories never
//! touch each other's files.

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::tracing_config::events;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Unique identifier naming one request's files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobToken(Uuid);

impl JobToken {
    /// Generate a fresh random token
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Recover the token from a file name of the form `<token>_<rest>`
    #[must_use]
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (prefix, _) = file_name.split_once('_')?;
        Uuid::parse_str(prefix).ok().map(Self)
    }
}

impl Default for JobToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Which processing endpoint produced an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Background removal
    Processed,
    /// Segmentation
    Segmented,
}

impl OutputKind {
    /// File name suffix and logging label
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Segmented => "segmented",
        }
    }

    /// Verb used in failure messages ("Error processing image: ...")
    #[must_use]
    pub fn action(self) -> &'static str {
        match self {
            Self::Processed => "processing",
            Self::Segmented => "segmenting",
        }
    }
}

/// The upload and processed directories
#[derive(Debug, Clone)]
pub struct StoragePaths {
    upload_dir: PathBuf,
    processed_dir: PathBuf,
}

impl StoragePaths {
    #[must_use]
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(upload_dir: P, processed_dir: Q) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            processed_dir: processed_dir.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(&config.upload_dir, &config.processed_dir)
    }

    /// Create both directories if needed
    ///
    /// # Errors
    /// - Insufficient permissions to create a directory
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in self.dirs() {
            std::fs::create_dir_all(dir)
                .map_err(|e| ServiceError::file_io_error("create directory", dir, &e))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    #[must_use]
    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Both working directories, uploads first
    #[must_use]
    pub fn dirs(&self) -> [&Path; 2] {
        [&self.upload_dir, &self.processed_dir]
    }

    /// `uploads/<token>_input.jpg`, whatever the upload's actual format
    #[must_use]
    pub fn input_path(&self, token: JobToken) -> PathBuf {
        self.upload_dir.join(format!("{token}_input.jpg"))
    }

    #[must_use]
    pub fn output_path(&self, token: JobToken, kind: OutputKind) -> PathBuf {
        self.processed_dir.join(output_file_name(token, kind))
    }
}

/// `<token>_<suffix>.png`
#[must_use]
pub fn output_file_name(token: JobToken, kind: OutputKind) -> String {
    format!("{token}_{}.png", kind.suffix())
}

/// File locations and parameters of one request
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub token: JobToken,
    pub kind: OutputKind,
    pub model: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

impl ProcessingJob {
    /// Create a job with a fresh token
    #[must_use]
    pub fn new(paths: &StoragePaths, kind: OutputKind, model: String) -> Self {
        Self::with_token(paths, JobToken::new(), kind, model)
    }

    #[must_use]
    pub fn with_token(
        paths: &StoragePaths,
        token: JobToken,
        kind: OutputKind,
        model: String,
    ) -> Self {
        Self {
            input_path: paths.input_path(token),
            output_path: paths.output_path(token, kind),
            token,
            kind,
            model,
        }
    }

    #[must_use]
    pub fn output_file_name(&self) -> String {
        output_file_name(self.token, self.kind)
    }

    /// Persist the uploaded bytes
    ///
    /// # Errors
    /// - File system errors
    pub async fn write_input(&self, bytes: &[u8]) -> Result<()> {
        tokio::fs::write(&self.input_path, bytes)
            .await
            .map_err(|e| ServiceError::file_io_error("write upload", &self.input_path, &e))
    }

    /// Read the persisted upload back
    ///
    /// # Errors
    /// - File system errors
    pub async fn read_input(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.input_path)
            .await
            .map_err(|e| ServiceError::file_io_error("read upload", &self.input_path, &e))
    }

    /// Persist the processed bytes
    ///
    /// # Errors
    /// - File system errors
    pub async fn write_output(&self, bytes: &[u8]) -> Result<()> {
        tokio::fs::write(&self.output_path, bytes)
            .await
            .map_err(|e| ServiceError::file_io_error("write output", &self.output_path, &e))
    }

    /// Delete the upload; a missing file is fine, other failures are logged
    pub async fn discard_input(&self) {
        match tokio::fs::remove_file(&self.input_path).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => events::best_effort_failed("delete upload", &self.input_path, &e),
        }
    }

    /// Delete a partially written output after a failure
    pub async fn discard_output(&self) {
        match tokio::fs::remove_file(&self.output_path).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => events::best_effort_failed("delete output", &self.output_path, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_follow_naming_scheme() {
        let paths = StoragePaths::new("uploads", "processed");
        let token = JobToken::new();

        assert_eq!(
            paths.input_path(token),
            PathBuf::from(format!("uploads/{token}_input.jpg"))
        );
        assert_eq!(
            paths.output_path(token, OutputKind::Segmented),
            PathBuf::from(format!("processed/{token}_segmented.png"))
        );
    }

    #[test]
    fn test_tokens_are_distinct() {
        let tokens: std::collections::HashSet<_> = (0..100).map(|_| JobToken::new()).collect();
        assert_eq!(tokens.len(), 100);
    }

    #[test]
    fn test_token_round_trips_through_file_name() {
        let token = JobToken::new();
        let name = output_file_name(token, OutputKind::Processed);
        assert_eq!(JobToken::from_file_name(&name), Some(token));
        assert_eq!(JobToken::from_file_name("notes.txt"), None);
        assert_eq!(JobToken::from_file_name("abc_input.jpg"), None);
    }

    #[test]
    fn test_output_kind_labels() {
        assert_eq!(OutputKind::Processed.suffix(), "processed");
        assert_eq!(OutputKind::Segmented.action(), "segmenting");
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StoragePaths::new(dir.path().join("in"), dir.path().join("out"));
        paths.ensure_dirs().unwrap();

        let job = ProcessingJob::new(&paths, OutputKind::Processed, "u2net".to_string());
        job.write_input(b"raw").await.unwrap();
        assert_eq!(job.read_input().await.unwrap(), b"raw");

        job.write_output(b"png").await.unwrap();
        job.discard_input().await;
        assert!(!job.input_path.exists());
        assert!(job.output_path.exists());

        // Second discard hits NotFound and stays silent
        job.discard_input().await;
    }
}
