//! Service configuration
//!
//! `ServiceConfig` is plain data with serde support so it can be loaded from a
//! JSON file; the builder applies overrides and validates in `build()`.

use crate::cache::ModelStore;
use crate::error::{Result, ServiceError};
use crate::models::{ModelCatalog, DEFAULT_MODEL};
use crate::processor::BackendType;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default age after which the sweep deletes a file (one hour)
pub const DEFAULT_SWEEP_MAX_AGE_SECS: u64 = 3600;

/// Default upload size limit (20 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Runtime configuration for the image service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ServiceConfig {
    /// Address the HTTP server listens on
    pub bind_addr: SocketAddr,
    /// Directory for transient uploads
    pub upload_dir: PathBuf,
    /// Directory for processed outputs
    pub processed_dir: PathBuf,
    /// Directory holding `<model>.onnx` files
    pub models_dir: PathBuf,
    /// Model used when a request names none
    pub default_model: String,
    /// Inference backend
    pub backend: BackendType,
    /// Maximum accepted request body size in bytes
    pub max_upload_bytes: usize,
    /// Check upload magic bytes in addition to the declared content type
    pub sniff_content: bool,
    /// Files older than this are removed by the sweep
    pub sweep_max_age_secs: u64,
    /// Run the sweep periodically (disabled when `None`)
    pub sweep_interval_secs: Option<u64>,
    /// Concurrent inference cap
    pub max_concurrent_inference: usize,
    /// Requests allowed to wait for an inference slot
    pub max_queued_requests: usize,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Download missing preload models at startup
    pub auto_download: bool,
    /// Models to load (and optionally download) before serving
    pub preload_models: Vec<String>,
    /// Intra-op threads for the ONNX backend (0 = auto)
    pub intra_threads: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            upload_dir: PathBuf::from("uploads"),
            processed_dir: PathBuf::from("processed"),
            models_dir: ModelStore::default_dir(),
            default_model: DEFAULT_MODEL.to_string(),
            backend: BackendType::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            sniff_content: true,
            sweep_max_age_secs: DEFAULT_SWEEP_MAX_AGE_SECS,
            sweep_interval_secs: None,
            max_concurrent_inference: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            max_queued_requests: 64,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
                "http://localhost:8080".to_string(),
            ],
            auto_download: false,
            preload_models: vec![DEFAULT_MODEL.to_string()],
            intra_threads: 0,
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::new()
    }

    /// Load configuration from a JSON file; missing fields take defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - JSON is malformed or fails validation
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ServiceError::invalid_config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - Unknown default or preload model
    /// - Zero-sized limits
    /// - Upload and processed directories are the same
    pub fn validate(&self) -> Result<()> {
        if !ModelCatalog::is_supported(&self.default_model) {
            return Err(ServiceError::invalid_config(format!(
                "default model '{}' is not in the catalog",
                self.default_model
            )));
        }
        if let Some(unknown) = self
            .preload_models
            .iter()
            .find(|name| !ModelCatalog::is_supported(name))
        {
            return Err(ServiceError::invalid_config(format!(
                "preload model '{unknown}' is not in the catalog"
            )));
        }
        if self.max_upload_bytes == 0 {
            return Err(ServiceError::invalid_config("max_upload_bytes must be positive"));
        }
        if self.max_concurrent_inference == 0 {
            return Err(ServiceError::invalid_config(
                "max_concurrent_inference must be at least 1",
            ));
        }
        if self.sweep_max_age_secs == 0 {
            return Err(ServiceError::invalid_config("sweep_max_age_secs must be positive"));
        }
        if self.sweep_interval_secs == Some(0) {
            return Err(ServiceError::invalid_config("sweep_interval_secs must be positive"));
        }
        if self.upload_dir == self.processed_dir {
            return Err(ServiceError::invalid_config(
                "upload_dir and processed_dir must differ",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn sweep_max_age(&self) -> Duration {
        Duration::from_secs(self.sweep_max_age_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }
}

/// Builder for `ServiceConfig`
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ServiceConfig::default(),
        }
    }

    /// Start from an existing configuration (e.g. one loaded from a file)
    #[must_use]
    pub fn from_config(config: ServiceConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    #[must_use]
    pub fn upload_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    #[must_use]
    pub fn processed_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.processed_dir = dir.into();
        self
    }

    #[must_use]
    pub fn models_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.models_dir = dir.into();
        self
    }

    #[must_use]
    pub fn default_model<S: Into<String>>(mut self, model: S) -> Self {
        self.config.default_model = model.into();
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    #[must_use]
    pub fn sniff_content(mut self, sniff: bool) -> Self {
        self.config.sniff_content = sniff;
        self
    }

    #[must_use]
    pub fn sweep_max_age_secs(mut self, secs: u64) -> Self {
        self.config.sweep_max_age_secs = secs;
        self
    }

    #[must_use]
    pub fn sweep_interval_secs(mut self, secs: Option<u64>) -> Self {
        self.config.sweep_interval_secs = secs;
        self
    }

    #[must_use]
    pub fn max_concurrent_inference(mut self, limit: usize) -> Self {
        self.config.max_concurrent_inference = limit;
        self
    }

    #[must_use]
    pub fn max_queued_requests(mut self, limit: usize) -> Self {
        self.config.max_queued_requests = limit;
        self
    }

    #[must_use]
    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.config.allowed_origins = origins;
        self
    }

    #[must_use]
    pub fn auto_download(mut self, enabled: bool) -> Self {
        self.config.auto_download = enabled;
        self
    }

    #[must_use]
    pub fn preload_models(mut self, models: Vec<String>) -> Self {
        self.config.preload_models = models;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Build the service configuration
    ///
    /// # Errors
    /// Returns `ServiceError::InvalidConfig` when validation fails
    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ServiceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_original_service() {
        let config = ServiceConfig::default();
        assert_eq!(config.bind_addr.port(), 8001);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.processed_dir, PathBuf::from("processed"));
        assert_eq!(config.default_model, "u2net");
        assert_eq!(config.sweep_max_age(), Duration::from_secs(3600));
        assert!(config.sweep_interval().is_none());
        assert!(config.max_concurrent_inference >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = ServiceConfig::builder()
            .upload_dir("/tmp/in")
            .processed_dir("/tmp/out")
            .default_model("isnet-general-use")
            .backend(BackendType::Mock)
            .max_concurrent_inference(2)
            .sweep_interval_secs(Some(600))
            .build()
            .unwrap();

        assert_eq!(config.upload_dir, PathBuf::from("/tmp/in"));
        assert_eq!(config.default_model, "isnet-general-use");
        assert_eq!(config.backend, BackendType::Mock);
        assert_eq!(config.max_concurrent_inference, 2);
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_validation_failures() {
        let err = ServiceConfig::builder().default_model("u3net").build().unwrap_err();
        assert!(err.to_string().contains("u3net"));

        let err = ServiceConfig::builder()
            .preload_models(vec!["nope".to_string()])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("nope"));

        assert!(ServiceConfig::builder().max_concurrent_inference(0).build().is_err());
        assert!(ServiceConfig::builder().max_upload_bytes(0).build().is_err());
        assert!(ServiceConfig::builder().sweep_interval_secs(Some(0)).build().is_err());
        assert!(ServiceConfig::builder()
            .upload_dir("same")
            .processed_dir("same")
            .build()
            .is_err());
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        std::fs::write(
            &path,
            r#"{"bind_addr":"127.0.0.1:9000","backend":"mock","sweep_max_age_secs":60}"#,
        )
        .unwrap();

        let config = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.backend, BackendType::Mock);
        assert_eq!(config.sweep_max_age_secs, 60);
        assert_eq!(config.default_model, "u2net");
    }

    #[test]
    fn test_from_file_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ServiceConfig::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), "invalid_config");
    }
}
