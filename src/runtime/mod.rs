//! # Runtime
//!
//! Process orchestration: startup, the two operating modes and shutdown.
//!
//! - `initialization`: crypto provider, Kubernetes client, loop construction
//! - `watch_mode`: background loops, readiness, graceful stop
//! - `list_mode`: one listing pass per loop, then exit
//! - `signals`: ready/stop flags and OS signal handling

pub mod initialization;
pub mod list_mode;
pub mod signals;
pub mod watch_mode;

use crate::config::{ConfigError, Method, SidecarConfig};
use crate::controller::error_policy::ApiError;
use crate::controller::reconciler::LoopError;
use crate::observability::metrics;
use crate::server::{start_server, ServerState};
use signals::{shutdown_signal, Flag};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use watch_mode::WatchHandle;

#[derive(Debug, Error)]
pub enum SidecarError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to create Kubernetes client: {0}")]
    Client(#[source] kube::Error),
    #[error("failed to prepare output folder {}: {source}", .path.display())]
    Folder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reconciliation loop {target} failed: {source}")]
    Loop {
        target: String,
        #[source]
        source: LoopError,
    },
    #[error("listing {target} failed: {source}")]
    List {
        target: String,
        #[source]
        source: ApiError,
    },
    #[error("reconciliation loop {target} terminated abnormally: {message}")]
    Aborted { target: String, message: String },
    #[error("failed to initialize metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Run the sidecar in the configured mode until it finishes or is terminated
pub async fn run(config: SidecarConfig) -> Result<(), SidecarError> {
    metrics::register_metrics()?;
    initialization::prepare_output_folder(&config.folder)?;
    initialization::install_crypto_provider();

    let client = initialization::kube_client().await?;
    let loops = initialization::build_loops(&config, &client);
    info!(loops = loops.len(), "Reconciliation loops configured");

    match config.method {
        Method::List => {
            let materialized = list_mode::run_list_mode(loops).await?;
            info!(materialized, "LIST pass complete");
            Ok(())
        }
        Method::Watch => {
            let ready = Flag::new();
            let stop = Flag::new();

            if let Some(port) = config.health_port {
                let state = Arc::new(ServerState { ready: ready.clone() });
                let server_stop = stop.clone();
                tokio::spawn(async move {
                    if let Err(e) = start_server(port, state, server_stop).await {
                        error!("HTTP server error: {}", e);
                    }
                });
            }

            WatchHandle::start(loops, ready, stop)
                .run(shutdown_signal())
                .await
        }
    }
}
