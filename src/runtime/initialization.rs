//! # Initialization
//!
//! Startup steps shared by both modes: rustls setup, the output folder, the
//! Kubernetes client and one reconciliation loop per (kind, scope target).

use crate::config::SidecarConfig;
use crate::constants::CONTROLLER_NAME;
use crate::controller::events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
use crate::controller::materializer::FileMaterializer;
use crate::controller::reconciler::KindReconciler;
use crate::controller::resource::ResourceKind;
use crate::controller::source::{KubeResourceApi, ResourceApi};
use crate::runtime::SidecarError;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::Client;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Install the ring crypto provider before any TLS connection is made
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
}

pub fn prepare_output_folder(folder: &Path) -> Result<(), SidecarError> {
    std::fs::create_dir_all(folder).map_err(|source| SidecarError::Folder {
        path: folder.to_path_buf(),
        source,
    })
}

pub async fn kube_client() -> Result<Client, SidecarError> {
    let client = Client::try_default().await.map_err(SidecarError::Client)?;
    info!(
        default_namespace = client.default_namespace(),
        "Connected to Kubernetes API"
    );
    Ok(client)
}

/// Loops backed by the Kubernetes API
#[must_use]
pub fn build_loops(config: &SidecarConfig, client: &Client) -> Vec<KindReconciler> {
    let events: Arc<dyn EventPublisher> = if config.event_logging {
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME))
    } else {
        Arc::new(NoopEventPublisher)
    };
    let label_selector = config.selector.label_selector();
    let server_timeout = config.effective_server_timeout_secs();

    build_loops_with(config, events, |kind, namespace| -> Box<dyn ResourceApi> {
        match kind {
            ResourceKind::ConfigMap => Box::new(KubeResourceApi::<ConfigMap>::new(
                client.clone(),
                namespace,
                label_selector.as_str(),
                server_timeout,
            )),
            ResourceKind::Secret => Box::new(KubeResourceApi::<Secret>::new(
                client.clone(),
                namespace,
                label_selector.as_str(),
                server_timeout,
            )),
        }
    })
}

/// One loop per enabled kind and scope target, with the API supplied by `make_api`
pub fn build_loops_with<F>(
    config: &SidecarConfig,
    events: Arc<dyn EventPublisher>,
    mut make_api: F,
) -> Vec<KindReconciler>
where
    F: FnMut(ResourceKind, Option<String>) -> Box<dyn ResourceApi>,
{
    let selector = Arc::new(config.selector.clone());
    let materializer = Arc::new(FileMaterializer::new(
        config.folder.clone(),
        config.file_mode,
        config.target_dir_annotation.clone(),
    ));
    let settings = config.loop_settings();

    let mut loops = Vec::new();
    for kind in config.selector.kinds.kinds() {
        for namespace in config.scope.targets() {
            loops.push(KindReconciler::new(
                make_api(kind, namespace),
                Arc::clone(&selector),
                Arc::clone(&materializer),
                Arc::clone(&events),
                &settings,
            ));
        }
    }
    loops
}
