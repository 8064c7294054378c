//! Inference seams
//!
//! Two traits split the model call into the layers the service cares about:
//! - [`BackgroundRemover`] is the opaque `transform(bytes, model) -> bytes`
//!   contract the HTTP layer depends on. Fakes implement it directly.
//! - [`InferenceBackend`] is the tensor-level engine (Tract, ONNX Runtime)
//!   that the real remover drives for one model.

use crate::{config::ServiceConfig, error::Result};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Image-in, image-out background removal
///
/// Implementations are called from blocking worker threads, never from the
/// async request workers.
pub trait BackgroundRemover: Send + Sync {
    /// Remove the background from `image` using the catalog model `model`
    ///
    /// # Errors
    /// - `UnsupportedModel` for names outside the catalog
    /// - `InvalidImage` when `image` cannot be decoded
    /// - `ModelUnavailable` / `ModelInvocation` for backend failures
    fn transform(&self, image: &[u8], model: &str) -> Result<Vec<u8>>;
}

/// Trait for inference backends
pub trait InferenceBackend: Send {
    /// Load the model and prepare the engine
    ///
    /// Returns the model load time on first initialization, `None` when the
    /// backend was already initialized.
    ///
    /// # Errors
    /// - Model file missing or unreadable
    /// - Engine rejects the graph
    fn initialize(&mut self, config: &ServiceConfig) -> Result<Option<Duration>>;

    /// Run inference on an NCHW input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Engine failure or unexpected output rank
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;

    /// Short engine name for logs
    fn engine_name(&self) -> &'static str;
}
