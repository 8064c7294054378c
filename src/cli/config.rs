//! Layering of CLI flags over the config file and defaults

use crate::cli::main_impl::{Cli, ServeArgs};
use crate::config::{ServiceConfig, ServiceConfigBuilder};
use anyhow::{Context, Result};

/// Configuration from `--config` (or defaults) plus global flags
pub(crate) fn base_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if let Some(dir) = &cli.models_dir {
        config.models_dir.clone_from(dir);
    }
    Ok(config)
}

/// Apply `serve` flags on top of `base` and validate the result
pub(crate) fn serve_config(base: ServiceConfig, args: &ServeArgs) -> Result<ServiceConfig> {
    let mut builder = ServiceConfigBuilder::from_config(base);

    if let Some(addr) = args.bind {
        builder = builder.bind_addr(addr);
    }
    if let Some(dir) = &args.upload_dir {
        builder = builder.upload_dir(dir);
    }
    if let Some(dir) = &args.processed_dir {
        builder = builder.processed_dir(dir);
    }
    if let Some(backend) = args.backend {
        builder = builder.backend(backend);
    }
    if let Some(model) = &args.default_model {
        builder = builder.default_model(model);
    }
    if let Some(bytes) = args.max_upload_bytes {
        builder = builder.max_upload_bytes(bytes);
    }
    if args.no_sniff {
        builder = builder.sniff_content(false);
    }
    if let Some(secs) = args.max_age {
        builder = builder.sweep_max_age_secs(secs);
    }
    if let Some(secs) = args.sweep_interval {
        builder = builder.sweep_interval_secs(Some(secs));
    }
    if let Some(limit) = args.max_concurrent {
        builder = builder.max_concurrent_inference(limit);
    }
    if let Some(limit) = args.max_queued {
        builder = builder.max_queued_requests(limit);
    }
    if !args.allowed_origins.is_empty() {
        builder = builder.allowed_origins(args.allowed_origins.clone());
    }
    if args.auto_download {
        builder = builder.auto_download(true);
    }
    if !args.preload.is_empty() {
        builder = builder.preload_models(args.preload.clone());
    }
    if let Some(threads) = args.threads {
        builder = builder.intra_threads(threads);
    }

    builder.build().context("Invalid service configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::BackendType;
    use clap::Parser;

    #[test]
    fn test_serve_flags_override_defaults() {
        let cli = Cli::parse_from([
            "kyarafit-image-service",
            "serve",
            "--bind",
            "127.0.0.1:9100",
            "--backend",
            "mock",
            "--preload",
            "u2netp,silueta",
            "--no-sniff",
            "--sweep-interval",
            "600",
        ]);
        let Some(crate::cli::Command::Serve(args)) = &cli.command else {
            panic!("expected serve subcommand");
        };

        let config = serve_config(base_config(&cli).unwrap(), args).unwrap();
        assert_eq!(config.bind_addr.port(), 9100);
        assert_eq!(config.backend, BackendType::Mock);
        assert_eq!(config.preload_models, vec!["u2netp", "silueta"]);
        assert!(!config.sniff_content);
        assert_eq!(config.sweep_interval_secs, Some(600));
        assert_eq!(config.default_model, "u2net");
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let cli = Cli::parse_from(["kyarafit-image-service", "serve", "--default-model", "u3net"]);
        let Some(crate::cli::Command::Serve(args)) = &cli.command else {
            panic!("expected serve subcommand");
        };
        assert!(serve_config(base_config(&cli).unwrap(), args).is_err());
    }

    #[test]
    fn test_global_models_dir_flag() {
        let cli = Cli::parse_from(["kyarafit-image-service", "list-models", "--models-dir", "/opt/models"]);
        let config = base_config(&cli).unwrap();
        assert_eq!(config.models_dir, std::path::PathBuf::from("/opt/models"));
    }
}
