//! Kyarafit image service
//!
//! HTTP service removing backgrounds from wardrobe photos, with subcommands
//! for model management and one-shot cleanup.

#[cfg(feature = "cli")]
use kyarafit_image_service::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
