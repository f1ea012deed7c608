//! # Kubernetes File Sidecar
//!
//! Writes the data of labelled ConfigMaps and Secrets into a folder shared with
//! another container and keeps it in sync.
//!
//! Configuration is read from environment variables (or the equivalent flags,
//! see `--help`). `METHOD=WATCH` keeps running until SIGTERM, `METHOD=LIST`
//! performs a single pass and exits.

use anyhow::{Context, Result};
use k8s_file_sidecar::config::SidecarConfig;
use k8s_file_sidecar::observability;
use k8s_file_sidecar::runtime;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = SidecarConfig::from_env().context("Invalid configuration")?;

    observability::init_tracing(config.log_format, config.debug, config.verbose)?;

    info!("Starting k8s-file-sidecar v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    config.log_summary();

    runtime::run(config).await?;

    info!("k8s-file-sidecar exiting");
    Ok(())
}
