//! Model downloading
//!
//! Catalog models are published as single ONNX files. Downloads stream into a
//! temporary file inside the models directory, hash the bytes on the way
//! through, and are renamed into place only once complete.

use crate::cache::{format_size, ModelStore};
use crate::error::{Result, ServiceError};
use crate::models::ModelDescriptor;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

/// Release location hosting the catalog's ONNX files
pub const DEFAULT_MODEL_BASE_URL: &str =
    "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

/// Result of a completed download
#[derive(Debug, Clone)]
pub struct DownloadedModel {
    pub name: &'static str,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
    /// `false` when the model was already installed and nothing was fetched
    pub fetched: bool,
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

/// Downloads catalog models into a `ModelStore`
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    store: ModelStore,
    base_url: String,
}

impl ModelDownloader {
    /// Create a downloader writing into `store`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(store: ModelStore) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| ServiceError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            store,
            base_url: DEFAULT_MODEL_BASE_URL.to_string(),
        })
    }

    /// Override the release base URL (mirrors, air-gapped hosts)
    #[must_use]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Download URL for a catalog model
    #[must_use]
    pub fn model_url(&self, descriptor: &ModelDescriptor) -> String {
        format!("{}/{}", self.base_url, descriptor.file_name())
    }

    /// Make sure `descriptor` is installed, downloading it when missing
    ///
    /// # Errors
    /// - Network errors or non-success HTTP status
    /// - File system errors in the models directory
    pub async fn ensure_model(
        &self,
        descriptor: &'static ModelDescriptor,
        show_progress: bool,
    ) -> Result<DownloadedModel> {
        let path = self.store.model_path(descriptor);
        if self.store.is_installed(descriptor) {
            log::debug!("Model already installed: {}", path.display());
            let size_bytes = std::fs::metadata(&path)
                .map_err(|e| ServiceError::file_io_error("stat model", &path, &e))?
                .len();
            return Ok(DownloadedModel {
                name: descriptor.name,
                path,
                size_bytes,
                sha256: String::new(),
                fetched: false,
            });
        }
        self.download_model(descriptor, show_progress).await
    }

    /// Download `descriptor` unconditionally, replacing any installed copy
    ///
    /// # Errors
    /// - Network errors or non-success HTTP status
    /// - File system errors in the models directory
    pub async fn download_model(
        &self,
        descriptor: &'static ModelDescriptor,
        show_progress: bool,
    ) -> Result<DownloadedModel> {
        self.store.ensure_dir()?;
        let url = self.model_url(descriptor);
        let final_path = self.store.model_path(descriptor);
        log::info!("Downloading model {} from {}", descriptor.name, url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(ServiceError::network_error(
                format!("Failed to download {url}"),
                format!("HTTP {}", response.status()),
            ));
        }

        let total_size = response.content_length();
        let progress = if show_progress {
            Self::create_progress_indicator(descriptor.name)
        } else {
            ProgressIndicator::NoOp
        };
        if let Some(total) = total_size {
            progress.set_length(total);
        }

        // The temp file lives in the target directory so the final rename
        // never crosses file systems.
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}-", descriptor.name))
            .suffix(".part")
            .tempfile_in(self.store.models_dir())
            .map_err(|e| {
                ServiceError::file_io_error("create temp file in", self.store.models_dir(), &e)
            })?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(std::io::Error::other),
        );

        let (downloaded, sha256) = copy_and_hash(&mut stream, temp.as_file_mut(), &progress).await?;

        if let Some(total) = total_size {
            if total != downloaded {
                progress.finish_with_message(format!("❌ {} truncated", descriptor.name));
                return Err(ServiceError::network_error(
                    format!("Download of {url} truncated"),
                    format!("expected {total} bytes, got {downloaded}"),
                ));
            }
        }

        temp.as_file()
            .sync_all()
            .map_err(|e| ServiceError::file_io_error("flush", temp.path(), &e))?;
        temp.persist(&final_path)
            .map_err(|e| ServiceError::file_io_error("move downloaded model to", &final_path, &e.error))?;

        progress.finish_with_message(format!(
            "✅ {} ({})",
            descriptor.name,
            format_size(downloaded)
        ));
        log::info!(
            "Installed model {} ({}, sha256 {})",
            descriptor.name,
            format_size(downloaded),
            sha256
        );

        Ok(DownloadedModel {
            name: descriptor.name,
            path: final_path,
            size_bytes: downloaded,
            sha256,
            fetched: true,
        })
    }

    fn create_progress_indicator(name: &str) -> ProgressIndicator {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} {prefix} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb.set_prefix(name.to_string());
            ProgressIndicator::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            let _ = name;
            ProgressIndicator::NoOp
        }
    }
}

/// Copy `reader` into `writer`, returning the byte count and SHA-256 hex digest
async fn copy_and_hash<R, W>(
    reader: &mut R,
    writer: &mut W,
    progress: &ProgressIndicator,
) -> Result<(u64, String)>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let mut hasher = Sha256::new();
    let mut copied = 0u64;
    let mut buffer = vec![0; 64 * 1024];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| ServiceError::network_error("Failed to read download stream", e))?;
        if bytes_read == 0 {
            break;
        }
        let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
        hasher.update(chunk);
        writer.write_all(chunk)?;
        copied += bytes_read as u64;
        progress.set_position(copied);
    }

    Ok((copied, format!("{:x}", hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelCatalog;

    #[test]
    fn test_model_url() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::new(ModelStore::new(dir.path())).unwrap();
        let descriptor = ModelCatalog::resolve("isnet-general-use").unwrap();
        assert_eq!(
            downloader.model_url(descriptor),
            "https://github.com/danielgatis/rembg/releases/download/v0.0.0/isnet-general-use.onnx"
        );

        let mirrored = downloader.with_base_url("http://mirror.local/models/");
        assert_eq!(
            mirrored.model_url(descriptor),
            "http://mirror.local/models/isnet-general-use.onnx"
        );
    }

    #[tokio::test]
    async fn test_ensure_model_skips_installed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("u2netp.onnx"), b"weights").unwrap();
        let downloader = ModelDownloader::new(ModelStore::new(dir.path()))
            .unwrap()
            .with_base_url("http://127.0.0.1:9");

        let result = downloader
            .ensure_model(ModelCatalog::resolve("u2netp").unwrap(), false)
            .await
            .unwrap();
        assert!(!result.fetched);
        assert_eq!(result.size_bytes, 7);
    }

    #[tokio::test]
    async fn test_download_failure_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::new(ModelStore::new(dir.path()))
            .unwrap()
            .with_base_url("http://127.0.0.1:9");

        let err = downloader
            .download_model(ModelCatalog::resolve("u2net").unwrap(), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "network");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_copy_and_hash_digest() {
        let mut written = Vec::new();
        let (size, digest) = copy_and_hash(&mut &b"abc"[..], &mut written, &ProgressIndicator::NoOp)
            .await
            .unwrap();

        assert_eq!(size, 3);
        assert_eq!(written, b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_copy_and_hash_spans_buffer_boundaries() {
        let payload = vec![7u8; 64 * 1024 + 5];
        let mut written = Vec::new();
        let (size, _) = copy_and_hash(&mut payload.as_slice(), &mut written, &ProgressIndicator::NoOp)
            .await
            .unwrap();

        assert_eq!(size, payload.len() as u64);
        assert_eq!(written, payload);
    }
}
