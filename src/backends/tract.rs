//! Tract backend
//!
//! Pure Rust ONNX inference: no native runtime to install, CPU only.
//!
//! An optimized plan runs through `&self`, so every session of a model
//! shares one loaded copy through [`SharedModelCache`].

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::inference::InferenceBackend;
use crate::models::ModelManager;
use ndarray::Array4;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tract_onnx::prelude::*;

use instant::{Duration, Instant};

/// Type alias for the complex Tract model type to reduce complexity warnings
pub type TractModel =
    RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Loaded models keyed by catalog name, shared between sessions
#[derive(Debug)]
pub struct SharedModelCache<T> {
    models: Arc<Mutex<HashMap<&'static str, Arc<T>>>>,
}

impl<T> Clone for SharedModelCache<T> {
    fn clone(&self) -> Self {
        Self {
            models: Arc::clone(&self.models),
        }
    }
}

impl<T> Default for SharedModelCache<T> {
    fn default() -> Self {
        Self {
            models: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> SharedModelCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached model for `name`, running `load` on a miss
    ///
    /// `load` runs without the lock held; when two loads race the first
    /// stored copy wins.
    ///
    /// # Errors
    /// - Whatever `load` returns
    pub fn get_or_load<F>(&self, name: &'static str, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(model) = self.lock().get(name) {
            return Ok(Arc::clone(model));
        }
        let loaded = Arc::new(load()?);
        Ok(Arc::clone(self.lock().entry(name).or_insert(loaded)))
    }

    /// Number of distinct models held
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, Arc<T>>> {
        self.models
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Tract backend for one catalog model
#[derive(Debug)]
pub struct TractBackend {
    model: Option<Arc<TractModel>>,
    model_manager: ModelManager,
    cache: SharedModelCache<TractModel>,
}

impl TractBackend {
    /// Backend with its own model cache
    #[must_use]
    pub fn new(model_manager: ModelManager) -> Self {
        Self::with_cache(model_manager, SharedModelCache::new())
    }

    /// Backend reusing models already loaded into `cache`
    #[must_use]
    pub fn with_cache(model_manager: ModelManager, cache: SharedModelCache<TractModel>) -> Self {
        Self {
            model: None,
            model_manager,
            cache,
        }
    }

    fn load_model(&mut self) -> Result<Duration> {
        let model_load_start = Instant::now();
        let name = self.model_manager.descriptor().name;
        let manager = &self.model_manager;
        let model = self.cache.get_or_load(name, || Self::build_model(manager))?;
        self.model = Some(model);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract backend for {} initialized in {}ms",
            name,
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }

    fn build_model(model_manager: &ModelManager) -> Result<TractModel> {
        let model_data = model_manager.load_model()?;
        let descriptor = model_manager.descriptor();
        let (n, c, h, w) = descriptor.input_shape();

        log::info!(
            "Loading {} with Tract ({:.2} MB)",
            descriptor.name,
            model_data.len() as f64 / (1024.0 * 1024.0)
        );

        onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| ServiceError::model_invocation(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([n, c, h, w]).into())
            .map_err(|e| ServiceError::model_invocation(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| ServiceError::model_invocation(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                ServiceError::model_invocation(format!("Failed to create runnable model: {e}"))
            })
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, _config: &ServiceConfig) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model().map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| ServiceError::model_invocation("Tract model not initialized"))?;

        log::debug!("Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let data: Vec<f32> = input.iter().copied().collect();
        let input_tensor = Tensor::from_shape(input.shape(), &data).map_err(|e| {
            ServiceError::model_invocation(format!("Failed to build input tensor: {e}"))
        })?;

        let outputs = model.run(tvec![input_tensor.into()]).map_err(|e| {
            ServiceError::model_invocation(format!("Tract inference failed: {e}"))
        })?;

        // Multi-output graphs (U²-Net emits side outputs) put the fused map first
        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::model_invocation("No output tensor found"))?
            .into_arc_tensor();

        let output_view = output_tensor.to_array_view::<f32>().map_err(|e| {
            ServiceError::model_invocation(format!("Failed to read output tensor: {e}"))
        })?;

        let shape = output_view.shape().to_vec();
        let [on, oc, oh, ow] = shape.as_slice() else {
            return Err(ServiceError::model_invocation(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        };

        let output = Array4::from_shape_vec(
            (*on, *oc, *oh, *ow),
            output_view.iter().copied().collect(),
        )
        .map_err(|e| {
            ServiceError::model_invocation(format!("Failed to reshape output tensor: {e}"))
        })?;

        log::debug!(
            "Tract inference completed in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            output.shape()
        );
        Ok(output)
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn engine_name(&self) -> &'static str {
        "tract"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelCatalog;

    #[test]
    fn test_tract_backend_starts_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(ModelCatalog::resolve("u2net").unwrap(), dir.path());
        let mut backend = TractBackend::new(manager);

        assert!(!backend.is_initialized());
        assert_eq!(backend.engine_name(), "tract");
        let err = backend.infer(&Array4::zeros((1, 3, 320, 320))).unwrap_err();
        assert_eq!(err.kind(), "model_invocation_failed");
    }

    #[test]
    fn test_tract_backend_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(ModelCatalog::resolve("u2net").unwrap(), dir.path());
        let mut backend = TractBackend::new(manager);

        let err = backend.initialize(&ServiceConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_tract_backend_rejects_garbage_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("u2net.onnx"), b"not a protobuf graph").unwrap();
        let manager = ModelManager::new(ModelCatalog::resolve("u2net").unwrap(), dir.path());
        let mut backend = TractBackend::new(manager);

        let err = backend.initialize(&ServiceConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "model_invocation_failed");
    }

    #[test]
    fn test_shared_cache_loads_each_model_once() {
        let cache = SharedModelCache::<String>::new();
        let loads = std::cell::Cell::new(0);
        let load = || -> Result<String> {
            loads.set(loads.get() + 1);
            Ok("graph".to_string())
        };

        let first = cache.get_or_load("u2net", load).unwrap();
        let second = cache.get_or_load("u2net", load).unwrap();
        let other = cache.clone().get_or_load("silueta", load).unwrap();

        assert_eq!(loads.get(), 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_shared_cache_does_not_keep_failed_loads() {
        let cache = SharedModelCache::<String>::new();
        let err = cache
            .get_or_load("u2net", || Err(ServiceError::model_unavailable("missing")))
            .unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");
        assert!(cache.is_empty());

        let model = cache.get_or_load("u2net", || Ok("graph".to_string())).unwrap();
        assert_eq!(model.as_str(), "graph");
    }
}
