//! Shared handler state

use crate::config::ServiceConfig;
use crate::inference::BackgroundRemover;
use crate::pool::InferencePool;
use crate::storage::StoragePaths;
use crate::sweep::ActiveJobs;
use std::sync::Arc;

/// State handed to every handler
#[derive(Debug)]
pub struct AppState {
    pub config: ServiceConfig,
    pub storage: StoragePaths,
    pub pool: InferencePool,
    pub active_jobs: ActiveJobs,
}

impl AppState {
    /// Wire `remover` into a pool sized from `config`
    #[must_use]
    pub fn new(config: ServiceConfig, remover: Arc<dyn BackgroundRemover>) -> Self {
        let pool = InferencePool::new(
            remover,
            config.max_concurrent_inference,
            config.max_queued_requests,
        );
        Self {
            storage: StoragePaths::from_config(&config),
            pool,
            active_jobs: ActiveJobs::new(),
            config,
        }
    }

    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
