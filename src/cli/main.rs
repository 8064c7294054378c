//! Image service command-line interface
//!
//! `serve` runs the HTTP service (the default when no subcommand is given);
//! the other subcommands manage model files and the working directories.

use super::config::{base_config, serve_config};
use crate::{
    cache::{format_size, ModelStore},
    config::ServiceConfig,
    download::ModelDownloader,
    error::ServiceError,
    http::{self, AppState},
    inference::BackgroundRemover,
    models::{ModelCatalog, ModelDescriptor},
    processor::{BackendFactory, BackendType, BackgroundRemovalProcessor, DefaultBackendFactory},
    storage::StoragePaths,
    sweep::{sweep_directories, ActiveJobs},
    tracing_config::{TracingConfig, TracingFormat},
};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Background removal and segmentation HTTP service
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "kyarafit-image-service")]
pub struct Cli {
    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console, global = true)]
    pub log_format: CliLogFormat,

    /// Directory holding `<model>.onnx` files [default: $KYARAFIT_MODELS_DIR or the user cache]
    #[arg(long, value_name = "PATH", global = true)]
    pub models_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Download catalog models into the models directory
    FetchModels {
        /// Models to fetch [default: the configured default model]
        names: Vec<String>,
        /// Fetch every catalog model
        #[arg(long, conflicts_with = "names")]
        all: bool,
        /// Download again even when already installed
        #[arg(long)]
        force: bool,
        /// Alternative release location
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,
    },
    /// List catalog models and their install state
    ListModels,
    /// Delete expired files from the working directories once and exit
    Cleanup {
        /// Age threshold in seconds [default: from config, 3600]
        #[arg(long, value_name = "SECS")]
        max_age: Option<u64>,
    },
}

#[derive(Args, Default)]
pub struct ServeArgs {
    /// Listen address [default: 0.0.0.0:8001]
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    #[arg(long, value_name = "PATH")]
    pub upload_dir: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub processed_dir: Option<PathBuf>,

    /// Inference backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendType>,

    /// Model used when a request names none
    #[arg(long)]
    pub default_model: Option<String>,

    #[arg(long, value_name = "BYTES")]
    pub max_upload_bytes: Option<usize>,

    /// Trust the declared content type without checking magic bytes
    #[arg(long)]
    pub no_sniff: bool,

    /// Sweep age threshold in seconds
    #[arg(long, value_name = "SECS")]
    pub max_age: Option<u64>,

    /// Also run the sweep every SECS seconds
    #[arg(long, value_name = "SECS")]
    pub sweep_interval: Option<u64>,

    /// Concurrent inference limit
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Requests allowed to wait for an inference slot
    #[arg(long)]
    pub max_queued: Option<usize>,

    /// CORS origin (repeatable)
    #[arg(long = "allow-origin", value_name = "ORIGIN")]
    pub allowed_origins: Vec<String>,

    /// Download missing preload models before serving
    #[arg(long)]
    pub auto_download: bool,

    /// Models to load before serving (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub preload: Vec<String>,

    /// Intra-op threads for the ONNX backend (0 = auto)
    #[arg(long)]
    pub threads: Option<usize>,
}

/// Main entry point for the CLI application
///
/// # Errors
/// - Invalid configuration or arguments
/// - Server, download or file system failures
pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli).context("Failed to initialize tracing")?;

    let base = base_config(&cli)?;
    match cli.command {
        None => serve(serve_config(base, &ServeArgs::default())?).await,
        Some(Command::Serve(ref args)) => serve(serve_config(base, args)?).await,
        Some(Command::FetchModels {
            ref names,
            all,
            force,
            ref base_url,
        }) => fetch_models(&base, names, all, force, base_url.as_deref()).await,
        Some(Command::ListModels) => {
            list_models(&base);
            Ok(())
        },
        Some(Command::Cleanup { max_age }) => cleanup(&base, max_age),
    }
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let format = match cli.log_format {
        CliLogFormat::Console => TracingFormat::Console,
        CliLogFormat::Compact => TracingFormat::Compact,
        #[cfg(feature = "tracing-json")]
        CliLogFormat::Json => TracingFormat::Json,
        #[cfg(not(feature = "tracing-json"))]
        CliLogFormat::Json => bail!("JSON logs need the `tracing-json` feature"),
    };

    let mut config = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format);
    if let Ok(filter) = std::env::var("RUST_LOG") {
        config = config.with_env_filter(filter);
    }
    config.init()
}

async fn serve(config: ServiceConfig) -> Result<()> {
    info!(
        backend = %config.backend,
        default_model = %config.default_model,
        models_dir = %config.models_dir.display(),
        "Starting image service"
    );

    let processor = build_processor(&config).await?;
    let state = AppState::new(config, Arc::clone(&processor) as Arc<dyn BackgroundRemover>).shared();
    http::serve(state, shutdown_signal())
        .await
        .context("Image service failed")?;

    let stats = processor.session_stats();
    info!(
        cache_hits = stats.cache_hits,
        cache_misses = stats.cache_misses,
        hit_ratio = stats.hit_ratio(),
        "Image service stopped"
    );
    Ok(())
}

/// Create the processor, fetching and warming the preload models
async fn build_processor(config: &ServiceConfig) -> Result<Arc<BackgroundRemovalProcessor>> {
    let factory = DefaultBackendFactory::default();
    let available = factory.available_backends();
    if !available.contains(&config.backend) {
        let names: Vec<String> = available.iter().map(ToString::to_string).collect();
        bail!(
            "Backend '{}' is not compiled into this build (available: {})",
            config.backend,
            names.join(", ")
        );
    }
    let preload = resolve_names(&config.preload_models)?;

    if config.auto_download && config.backend != BackendType::Mock {
        let downloader = ModelDownloader::new(ModelStore::new(&config.models_dir))?;
        for &descriptor in &preload {
            downloader
                .ensure_model(descriptor, false)
                .await
                .with_context(|| format!("Failed to fetch model {}", descriptor.name))?;
        }
    }

    let processor = Arc::new(BackgroundRemovalProcessor::with_factory(config, Box::new(factory)));
    for descriptor in preload {
        let worker = Arc::clone(&processor);
        let warm = tokio::task::spawn_blocking(move || worker.warm_up(descriptor.name))
            .await
            .context("Model warm-up task failed")?;
        match warm {
            Ok(Some(load_time)) => info!(
                model = descriptor.name,
                load_ms = load_time.as_millis(),
                "Model preloaded"
            ),
            Ok(None) => {},
            Err(e @ ServiceError::ModelUnavailable(_)) => {
                warn!(model = descriptor.name, error = %e, "Model not installed, requests for it will fail");
            },
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to load model {}", descriptor.name))
            },
        }
    }

    Ok(processor)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining requests");
}

fn resolve_names(names: &[String]) -> Result<Vec<&'static ModelDescriptor>> {
    names
        .iter()
        .map(|name| ModelCatalog::resolve(name).map_err(anyhow::Error::from))
        .collect()
}

async fn fetch_models(
    config: &ServiceConfig,
    names: &[String],
    all: bool,
    force: bool,
    base_url: Option<&str>,
) -> Result<()> {
    let descriptors: Vec<&'static ModelDescriptor> = if all {
        ModelCatalog::descriptors().iter().collect()
    } else if names.is_empty() {
        resolve_names(std::slice::from_ref(&config.default_model))?
    } else {
        resolve_names(names)?
    };

    let mut downloader = ModelDownloader::new(ModelStore::new(&config.models_dir))?;
    if let Some(url) = base_url {
        downloader = downloader.with_base_url(url);
    }

    println!("📥 Fetching models into {}", config.models_dir.display());
    for descriptor in descriptors {
        let result = if force {
            downloader.download_model(descriptor, true).await
        } else {
            downloader.ensure_model(descriptor, true).await
        }
        .with_context(|| format!("Failed to fetch model {}", descriptor.name))?;

        if result.fetched {
            println!("✅ {} ({}, sha256 {})", result.name, format_size(result.size_bytes), result.sha256);
        } else {
            println!("✔️  {} already installed ({})", result.name, format_size(result.size_bytes));
        }
    }
    Ok(())
}

fn list_models(config: &ServiceConfig) {
    let store = ModelStore::new(&config.models_dir);
    let installed = store.scan_installed();

    println!("📦 Models ({})", config.models_dir.display());
    for descriptor in ModelCatalog::descriptors() {
        let [width, height] = descriptor.preprocessing.target_size;
        let state = installed
            .iter()
            .find(|model| model.name == descriptor.name)
            .map_or_else(|| "not installed".to_string(), |model| format_size(model.size_bytes));
        let marker = if descriptor.name == config.default_model { "*" } else { " " };
        println!(
            "{marker} {:<18} {:>4}x{:<4} {:<14} {}",
            descriptor.name, width, height, state, descriptor.description
        );
    }

    if installed.is_empty() {
        println!("\n💡 To download the default model, use:");
        println!("  kyarafit-image-service fetch-models {}", config.default_model);
    }
}

fn cleanup(config: &ServiceConfig, max_age: Option<u64>) -> Result<()> {
    let max_age = max_age.map_or_else(|| config.sweep_max_age(), Duration::from_secs);
    let paths = StoragePaths::from_config(config);
    paths.ensure_dirs()?;

    let report = sweep_directories(&paths.dirs(), max_age, SystemTime::now(), &ActiveJobs::new())
        .context("Cleanup failed")?;
    println!("Cleaned up {} files", report.removed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_processor_with_mock_backend() {
        let config = ServiceConfig::builder()
            .backend(BackendType::Mock)
            .preload_models(vec!["u2netp".to_string()])
            .build()
            .unwrap();
        let processor = build_processor(&config).await.unwrap();

        assert_eq!(processor.backend_type(), BackendType::Mock);
        assert_eq!(processor.session_stats().idle_sessions, 1);
    }

    #[cfg(not(feature = "onnx"))]
    #[tokio::test]
    async fn test_build_processor_rejects_missing_backend() {
        let config = ServiceConfig::builder()
            .backend(BackendType::Onnx)
            .build()
            .unwrap();
        let err = build_processor(&config).await.unwrap_err();
        assert!(err.to_string().contains("not compiled into this build"));
    }
}
