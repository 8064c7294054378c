//! Local model store
//!
//! Model weights live as flat `<name>.onnx` files in a single directory.
//! By default that directory follows the XDG cache location:
//! - Linux/macOS: `~/.cache/kyarafit-image-service/models/`
//! - Windows: `%LOCALAPPDATA%/kyarafit-image-service/models/`

use crate::error::{Result, ServiceError};
use crate::models::{ModelCatalog, ModelDescriptor, ModelManager};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the models directory
pub const MODELS_DIR_ENV: &str = "KYARAFIT_MODELS_DIR";

/// Information about an installed model
#[derive(Debug, Clone)]
pub struct InstalledModel {
    pub name: &'static str,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Model store rooted at one directory
#[derive(Debug, Clone)]
pub struct ModelStore {
    models_dir: PathBuf,
}

impl ModelStore {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(models_dir: P) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    /// Resolve the default models directory
    ///
    /// Honours `KYARAFIT_MODELS_DIR`, then the user cache directory, and
    /// falls back to `./models` when neither is available.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(MODELS_DIR_ENV) {
            return PathBuf::from(dir);
        }
        dirs::cache_dir().map_or_else(
            || PathBuf::from("models"),
            |cache| cache.join("kyarafit-image-service").join("models"),
        )
    }

    #[must_use]
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Create the models directory if needed
    ///
    /// # Errors
    /// - Insufficient permissions to create the directory
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.models_dir)
            .map_err(|e| ServiceError::file_io_error("create models directory", &self.models_dir, &e))
    }

    /// Manager binding `descriptor` to this store
    #[must_use]
    pub fn manager(&self, descriptor: &'static ModelDescriptor) -> ModelManager {
        ModelManager::new(descriptor, &self.models_dir)
    }

    #[must_use]
    pub fn model_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.models_dir.join(descriptor.file_name())
    }

    #[must_use]
    pub fn is_installed(&self, descriptor: &ModelDescriptor) -> bool {
        self.model_path(descriptor).is_file()
    }

    /// List catalog models present in the store, in catalog order
    #[must_use]
    pub fn scan_installed(&self) -> Vec<InstalledModel> {
        ModelCatalog::descriptors()
            .iter()
            .filter_map(|descriptor| {
                let path = self.model_path(descriptor);
                let metadata = fs::metadata(&path).ok().filter(fs::Metadata::is_file)?;
                Some(InstalledModel {
                    name: descriptor.name,
                    size_bytes: metadata.len(),
                    modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                    path,
                })
            })
            .collect()
    }
}

/// Format a byte count for display
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", size, UNITS.get(unit).copied().unwrap_or("GB"))
    }
}
