//! Mock backends
//!
//! Deterministic stand-ins for the model, used by `backend = "mock"` and by
//! tests that must not depend on ONNX files:
//! - [`MockBackend`] is a tensor-level engine producing a centred ellipse,
//!   or vertical class bands for class-logit models
//! - [`StaticRemover`] returns a fixed payload for every request
//! - [`FailingRemover`] fails every request with an invocation error

use crate::{
    config::ServiceConfig,
    error::{Result, ServiceError},
    inference::{BackgroundRemover, InferenceBackend},
    models::{ModelCatalog, OutputHead},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Mock inference engine
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    should_fail_inference: bool,
    head: OutputHead,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            initialized: false,
            should_fail_inference: false,
            head: OutputHead::Saliency,
        }
    }
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock backend that will fail during inference
    #[must_use]
    pub fn new_failing_inference() -> Self {
        Self {
            should_fail_inference: true,
            ..Self::default()
        }
    }

    /// Produce outputs shaped for `head`
    #[must_use]
    pub fn with_head(mut self, head: OutputHead) -> Self {
        self.head = head;
        self
    }

    /// Elliptical saliency map with soft edges, 1.0 at the centre
    #[allow(clippy::cast_precision_loss)]
    fn generate_mask(height: usize, width: usize) -> Array4<f32> {
        let center_x = width as f32 / 2.0;
        let center_y = height as f32 / 2.0;
        let radius_x = (width as f32 / 3.0).max(1.0);
        let radius_y = (height as f32 / 3.0).max(1.0);

        Array4::from_shape_fn((1, 1, height, width), |(_, _, y, x)| {
            let dx = (x as f32 - center_x) / radius_x;
            let dy = (y as f32 - center_y) / radius_y;
            (1.0 - (dx * dx + dy * dy).sqrt()).clamp(0.0, 1.0)
        })
    }

    /// Class logits where class `k` wins in the k-th of `classes` vertical bands
    fn generate_logits(classes: usize, height: usize, width: usize) -> Array4<f32> {
        Array4::from_shape_fn((1, classes, height, width), |(_, class, _, x)| {
            if x * classes / width.max(1) == class {
                5.0
            } else {
                0.0
            }
        })
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &ServiceConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(0)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(ServiceError::model_invocation("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(ServiceError::model_invocation("Mock backend inference failed"));
        }

        let (_, _, height, width) = input.dim();
        Ok(match self.head {
            OutputHead::Saliency => Self::generate_mask(height, width),
            OutputHead::ClassLogits { classes } => Self::generate_logits(classes, height, width),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn engine_name(&self) -> &'static str {
        "mock"
    }
}

/// Remover returning the same bytes for every call
///
/// Model names are still checked against the catalog, as the real transform
/// does.
#[derive(Debug, Clone)]
pub struct StaticRemover {
    payload: Vec<u8>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StaticRemover {
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Model names passed to `transform`, in call order
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl BackgroundRemover for StaticRemover {
    fn transform(&self, _image: &[u8], model: &str) -> Result<Vec<u8>> {
        ModelCatalog::resolve(model)?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(model.to_string());
        }
        Ok(self.payload.clone())
    }
}

/// Remover that fails every call with a model invocation error
#[derive(Debug, Clone)]
pub struct FailingRemover {
    message: String,
}

impl FailingRemover {
    #[must_use]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl BackgroundRemover for FailingRemover {
    fn transform(&self, _image: &[u8], _model: &str) -> Result<Vec<u8>> {
        Err(ServiceError::model_invocation(self.message.clone()))
    }
}
