//! Model catalog and per-model loading
//!
//! The catalog is a fixed list of the segmentation models the service knows
//! how to drive. Each entry carries the preprocessing parameters and output
//! head layout the processor needs; the weights themselves live as ONNX files
//! in the model store (see [`crate::cache::ModelStore`]).

use crate::error::{Result, ServiceError};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Model used when the caller does not name one
pub const DEFAULT_MODEL: &str = "u2net";

/// Normalisation used by the U²-Net family
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessing parameters for a model's input tensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PreprocessingConfig {
    /// Square input resolution `[width, height]`
    pub target_size: [u32; 2],
    /// Per-channel mean subtracted after scaling to `0..=1`
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation
    pub normalization_std: [f32; 3],
}

/// Shape of the model's first output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputHead {
    /// Single-channel saliency map, min-max normalised into a mask
    Saliency,
    /// Per-class logits where class 0 is background
    ClassLogits { classes: usize },
}

/// Static description of a catalog model
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub preprocessing: PreprocessingConfig,
    pub head: OutputHead,
}

impl ModelDescriptor {
    /// File name of the ONNX graph inside the model store
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.onnx", self.name)
    }

    /// Expected input shape (NCHW)
    #[must_use]
    pub fn input_shape(&self) -> (usize, usize, usize, usize) {
        let [w, h] = self.preprocessing.target_size;
        (1, 3, h as usize, w as usize)
    }
}

const fn u2net_family(name: &'static str, description: &'static str) -> ModelDescriptor {
    ModelDescriptor {
        name,
        description,
        preprocessing: PreprocessingConfig {
            target_size: [320, 320],
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
        },
        head: OutputHead::Saliency,
    }
}

static CATALOG: [ModelDescriptor; 6] = [
    u2net_family("u2net", "General purpose salient object segmentation"),
    u2net_family("u2netp", "Lightweight U²-Net for faster inference"),
    u2net_family("u2net_human_seg", "U²-Net tuned for human segmentation"),
    ModelDescriptor {
        name: "u2net_cloth_seg",
        description: "Clothing parser (upper body, lower body, full body)",
        preprocessing: PreprocessingConfig {
            target_size: [768, 768],
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
        },
        head: OutputHead::ClassLogits { classes: 4 },
    },
    u2net_family("silueta", "U²-Net reduced to a 43MB checkpoint"),
    ModelDescriptor {
        name: "isnet-general-use",
        description: "IS-Net dichotomous segmentation for general use",
        preprocessing: PreprocessingConfig {
            target_size: [1024, 1024],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        },
        head: OutputHead::Saliency,
    },
];

/// Fixed catalog of recognised model identifiers
pub struct ModelCatalog;

impl ModelCatalog {
    /// Model names in catalog order; the first entry is the primary model
    #[must_use]
    pub fn names() -> Vec<&'static str> {
        CATALOG.iter().map(|d| d.name).collect()
    }

    #[must_use]
    pub fn descriptors() -> &'static [ModelDescriptor] {
        &CATALOG
    }

    #[must_use]
    pub fn get(name: &str) -> Option<&'static ModelDescriptor> {
        CATALOG.iter().find(|d| d.name == name)
    }

    /// Look up a model, failing with `UnsupportedModel` for unknown names
    pub fn resolve(name: &str) -> Result<&'static ModelDescriptor> {
        Self::get(name).ok_or_else(|| {
            ServiceError::unsupported_model(format!(
                "'{}' (expected one of: {})",
                name,
                Self::names().join(", ")
            ))
        })
    }

    #[must_use]
    pub fn is_supported(name: &str) -> bool {
        Self::get(name).is_some()
    }
}

/// Binds a catalog descriptor to its ONNX file on disk
#[derive(Debug, Clone)]
pub struct ModelManager {
    descriptor: &'static ModelDescriptor,
    path: PathBuf,
}

impl ModelManager {
    /// Create a manager for `descriptor` whose weights live in `models_dir`
    #[must_use]
    pub fn new(descriptor: &'static ModelDescriptor, models_dir: &Path) -> Self {
        Self {
            descriptor,
            path: models_dir.join(descriptor.file_name()),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &'static ModelDescriptor {
        self.descriptor
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.path
    }

    /// Whether the ONNX file is installed
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.path.is_file()
    }

    /// Read the ONNX graph into memory
    ///
    /// # Errors
    /// - `ModelUnavailable` when the file is missing
    /// - I/O errors while reading
    pub fn load_model(&self) -> Result<Vec<u8>> {
        if !self.is_installed() {
            return Err(self.unavailable_error());
        }
        fs::read(&self.path).map_err(|e| ServiceError::file_io_error("read model", &self.path, &e))
    }

    fn unavailable_error(&self) -> ServiceError {
        ServiceError::model_unavailable(format!(
            "model '{}' is not installed at {}; run `kyarafit-image-service fetch-models {}`",
            self.descriptor.name,
            self.path.display(),
            self.descriptor.name
        ))
    }
}
