#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Kyarafit Image Service
//!
//! HTTP service that removes the background of uploaded wardrobe photos with
//! a saliency or segmentation model and returns the result as a transparent
//! PNG.
//!
//! ## Features
//!
//! - **Model catalog**: `u2net`, `u2netp`, `u2net_human_seg`, `u2net_cloth_seg`,
//!   `silueta` and `isnet-general-use`, loaded from `<models_dir>/<name>.onnx`
//! - **Backends**: Tract (pure Rust, default) and ONNX Runtime (`onnx` feature)
//! - **Bounded inference**: a fixed number of concurrent model calls with a
//!   short wait queue, so overload turns into `503` instead of memory growth
//! - **Working directories**: uploads and results live under per-request
//!   tokens and are swept by age
//! - **CLI**: `serve`, `fetch-models`, `list-models` and `cleanup` (`cli` feature)
//!
//! ## Embedding the router
//!
//! ```rust,no_run
//! use kyarafit_image_service::{build_router, AppState, BackgroundRemovalProcessor, ServiceConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::builder()
//!     .upload_dir("/var/lib/kyarafit/uploads")
//!     .processed_dir("/var/lib/kyarafit/processed")
//!     .build()?;
//! let remover = Arc::new(BackgroundRemovalProcessor::new(&config));
//! let state = AppState::new(config, remover).shared();
//!
//! let app = build_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8001").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## One-off transforms
//!
//! ```rust,no_run
//! use kyarafit_image_service::{BackgroundRemovalProcessor, BackgroundRemover, ServiceConfig};
//!
//! # fn example(upload: &[u8]) -> kyarafit_image_service::Result<()> {
//! let processor = BackgroundRemovalProcessor::new(&ServiceConfig::default());
//! let png = processor.transform(upload, "u2netp")?;
//! std::fs::write("out.png", png)?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod inference;
pub mod models;
pub mod pool;
pub mod processor;
pub mod session_cache;
pub mod storage;
pub mod sweep;
pub mod tracing_config;
pub mod utils;

pub use backends::{FailingRemover, MockBackend, StaticRemover};
pub use cache::{format_size, InstalledModel, ModelStore};
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use download::{DownloadedModel, ModelDownloader};
pub use error::{Result, ServiceError};
pub use http::{build_router, serve, ApiError, AppState, ErrorBody};
pub use inference::{BackgroundRemover, InferenceBackend};
pub use models::{ModelCatalog, ModelDescriptor, ModelManager, OutputHead, PreprocessingConfig, DEFAULT_MODEL};
pub use pool::InferencePool;
pub use processor::{
    apply_mask, class_label_map, class_masks, cutout, decode_upload, encode_png, saliency_mask,
    stack_vertically, BackendFactory, BackendType, BackgroundRemovalProcessor, DefaultBackendFactory,
};
pub use session_cache::{SessionCache, SessionCacheStats};
pub use storage::{JobToken, OutputKind, ProcessingJob, StoragePaths};
pub use sweep::{sweep_directories, ActiveJobs, SweepReport};
pub use tracing_config::{events, spans, TracingConfig, TracingFormat};
pub use utils::ImagePreprocessor;
