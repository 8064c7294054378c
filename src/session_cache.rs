//! In-memory cache of initialised inference backends
//!
//! Loading and optimising an ONNX graph takes far longer than one inference,
//! so initialised backends are kept per model and reused. A backend is
//! checked out for the duration of one call ([`SessionLease`]) and returned
//! on drop; concurrent requests for the same model therefore each hold their
//! own session and never share mutable engine state.

use crate::error::{Result, ServiceError};
use crate::inference::InferenceBackend;
use ndarray::Array4;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Session cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCacheStats {
    /// Leases served from an idle session
    pub cache_hits: u64,
    /// Leases that had to create a new session
    pub cache_misses: u64,
    /// Idle sessions currently held, across all models
    pub idle_sessions: usize,
}

impl SessionCacheStats {
    /// Fraction of leases served from cache
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct CacheState {
    idle: HashMap<&'static str, Vec<Box<dyn InferenceBackend>>>,
    hits: u64,
    misses: u64,
}

/// Pool of idle backends keyed by model name
pub struct SessionCache {
    state: Mutex<CacheState>,
    /// Idle sessions kept per model; extras are dropped on return
    max_idle_per_model: usize,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("max_idle_per_model", &self.max_idle_per_model)
            .field("stats", &self.stats())
            .finish()
    }
}

impl SessionCache {
    #[must_use]
    pub fn new(max_idle_per_model: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_idle_per_model: max_idle_per_model.max(1),
        }
    }

    // A panic inside a backend call never leaves the map half-updated
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out a session for `model`, creating one with `create` on a miss
    ///
    /// `create` runs without the cache lock held, so a slow model load does
    /// not block leases for other models.
    ///
    /// # Errors
    /// Propagates any error from `create`
    pub fn lease<F>(&self, model: &'static str, create: F) -> Result<SessionLease<'_>>
    where
        F: FnOnce() -> Result<Box<dyn InferenceBackend>>,
    {
        let cached = {
            let mut state = self.state();
            let backend = state.idle.get_mut(model).and_then(Vec::pop);
            if backend.is_some() {
                state.hits += 1;
            } else {
                state.misses += 1;
            }
            backend
        };

        let backend = match cached {
            Some(backend) => {
                log::debug!("Reusing cached {} session for {}", backend.engine_name(), model);
                backend
            },
            None => {
                log::debug!("No idle session for {}, creating one", model);
                create()?
            },
        };

        Ok(SessionLease {
            cache: self,
            model,
            backend: Some(backend),
        })
    }

    fn check_in(&self, model: &'static str, backend: Box<dyn InferenceBackend>) {
        let mut state = self.state();
        let idle = state.idle.entry(model).or_default();
        if idle.len() < self.max_idle_per_model {
            idle.push(backend);
        }
    }

    #[must_use]
    pub fn stats(&self) -> SessionCacheStats {
        let state = self.state();
        SessionCacheStats {
            cache_hits: state.hits,
            cache_misses: state.misses,
            idle_sessions: state.idle.values().map(Vec::len).sum(),
        }
    }
}

/// Exclusive use of one cached backend, returned to the cache on drop
pub struct SessionLease<'a> {
    cache: &'a SessionCache,
    model: &'static str,
    backend: Option<Box<dyn InferenceBackend>>,
}

impl SessionLease<'_> {
    /// Run inference on the leased backend
    ///
    /// # Errors
    /// Propagates backend inference errors
    pub fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        match self.backend.as_mut() {
            Some(backend) => backend.infer(input),
            None => Err(ServiceError::model_invocation("session already released")),
        }
    }

    #[must_use]
    pub fn engine_name(&self) -> &'static str {
        self.backend.as_ref().map_or("released", |backend| backend.engine_name())
    }

    /// Drop the session instead of returning it to the cache
    pub fn discard(mut self) {
        self.backend = None;
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if let Some(backend) = self.backend.take() {
            self.cache.check_in(self.model, backend);
        }
    }
}
