//! ONNX Runtime backend
//!
//! Uses the native ONNX Runtime for inference. CPU execution everywhere;
//! thread counts follow `ServiceConfig::intra_threads`.

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::inference::InferenceBackend;
use crate::models::ModelManager;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;

use instant::{Duration, Instant};

/// ONNX Runtime backend for one catalog model
#[derive(Debug)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_manager: ModelManager,
}

impl OnnxBackend {
    #[must_use]
    pub fn new(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            model_manager,
        }
    }

    fn load_model(&mut self, config: &ServiceConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.model_manager.load_model()?;
        let descriptor = self.model_manager.descriptor();

        log::info!(
            "Loading {} with ONNX Runtime ({:.2} MB)",
            descriptor.name,
            model_data.len() as f64 / (1024.0 * 1024.0)
        );

        let mut builder = Session::builder()
            .map_err(|e| {
                ServiceError::model_invocation(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                ServiceError::model_invocation(format!("Failed to set optimization level: {e}"))
            })?;

        if config.intra_threads > 0 {
            builder = builder.with_intra_threads(config.intra_threads).map_err(|e| {
                ServiceError::model_invocation(format!("Failed to set intra threads: {e}"))
            })?;
        }

        let session = builder.commit_from_memory(&model_data).map_err(|e| {
            ServiceError::model_invocation(format!("Failed to create ONNX session: {e}"))
        })?;
        self.session = Some(session);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "ONNX Runtime backend for {} initialized in {}ms",
            descriptor.name,
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &ServiceConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }
        self.load_model(config).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ServiceError::model_invocation("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("Running ONNX inference on {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            ServiceError::model_invocation(format!("Failed to convert input tensor: {e}"))
        })?;

        // Positional inputs avoid depending on per-model tensor names
        let outputs = session.run(ort::inputs![input_value]).map_err(|e| {
            ServiceError::model_invocation(format!("ONNX inference failed: {e}"))
        })?;

        let (shape, values) = {
            let first = outputs
                .values()
                .next()
                .ok_or_else(|| ServiceError::model_invocation("No output tensors found"))?;
            let view = first.try_extract_array::<f32>().map_err(|e| {
                ServiceError::model_invocation(format!("Failed to extract output tensor: {e}"))
            })?;
            (view.shape().to_vec(), view.iter().copied().collect::<Vec<f32>>())
        };

        let [on, oc, oh, ow] = shape.as_slice() else {
            return Err(ServiceError::model_invocation(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        };

        let output = Array4::from_shape_vec((*on, *oc, *oh, *ow), values).map_err(|e| {
            ServiceError::model_invocation(format!("Failed to reshape output tensor: {e}"))
        })?;

        log::debug!(
            "ONNX inference completed in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            output.shape()
        );
        Ok(output)
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn engine_name(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelCatalog;

    #[test]
    fn test_onnx_backend_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(ModelCatalog::resolve("silueta").unwrap(), dir.path());
        let mut backend = OnnxBackend::new(manager);

        assert!(!backend.is_initialized());
        let err = backend.initialize(&ServiceConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");
    }
}
