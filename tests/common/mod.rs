//! Common test utilities for reconciliation tests
//!
//! Provides an in-memory [`ResourceApi`] scripted with list results and watch
//! streams, fixture builders for real `k8s-openapi` objects, and helpers to
//! inspect the output folder.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use k8s_file_sidecar::controller::error_policy::ApiError;
use k8s_file_sidecar::controller::events::EventPublisher;
use k8s_file_sidecar::controller::materializer::FileMaterializer;
use k8s_file_sidecar::controller::reconciler::{KindReconciler, LoopSettings};
use k8s_file_sidecar::controller::resource::{IntoWatched, ResourceKind, WatchedResource};
use k8s_file_sidecar::controller::selection::{ResourceKinds, Selector};
use k8s_file_sidecar::controller::source::{EventStream, ResourceApi, ResourceEvent, Snapshot};
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::runtime::events::EventType;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use walkdir::WalkDir;

pub const TARGET_DIR_ANNOTATION: &str = "k8s-sidecar-target-directory";

/// One scripted `watch` call
pub enum WatchScript {
    /// Yield these items, then end the stream
    Events(Vec<Result<ResourceEvent, ApiError>>),
    /// Fail to open the watch
    Fail(ApiError),
    /// Stream fed by the test through a channel; ends when the sender is dropped
    Channel(mpsc::UnboundedReceiver<Result<ResourceEvent, ApiError>>),
}

/// Script and call log shared between a test and its [`FakeApi`]
#[derive(Default)]
pub struct Script {
    lists: Mutex<VecDeque<Result<Snapshot, ApiError>>>,
    watches: Mutex<VecDeque<WatchScript>>,
    list_calls: Mutex<usize>,
    watch_versions: Mutex<Vec<String>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_list(&self, result: Result<Snapshot, ApiError>) {
        self.lists.lock().unwrap().push_back(result);
    }

    pub fn push_snapshot(&self, items: Vec<WatchedResource>, resource_version: &str) {
        self.push_list(Ok(Snapshot {
            items,
            resource_version: resource_version.to_string(),
        }));
    }

    pub fn push_watch(&self, watch: WatchScript) {
        self.watches.lock().unwrap().push_back(watch);
    }

    /// Queue a channel-fed watch and return its sender
    pub fn push_channel_watch(&self) -> mpsc::UnboundedSender<Result<ResourceEvent, ApiError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push_watch(WatchScript::Channel(rx));
        tx
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    /// resourceVersion passed to every watch call so far
    pub fn watch_versions(&self) -> Vec<String> {
        self.watch_versions.lock().unwrap().clone()
    }
}

pub struct FakeApi {
    kind: ResourceKind,
    namespace: Option<String>,
    script: Arc<Script>,
}

impl FakeApi {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, script: &Arc<Script>) -> Self {
        Self {
            kind,
            namespace: namespace.map(str::to_string),
            script: Arc::clone(script),
        }
    }
}

#[async_trait]
impl ResourceApi for FakeApi {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    async fn list(&self) -> Result<Snapshot, ApiError> {
        *self.script.list_calls.lock().unwrap() += 1;
        let next = self.script.lists.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(ApiError::Transient("no scripted list left".to_string())))
    }

    async fn watch(&self, resource_version: &str) -> Result<EventStream, ApiError> {
        self.script
            .watch_versions
            .lock()
            .unwrap()
            .push(resource_version.to_string());
        let next = self.script.watches.lock().unwrap().pop_front();
        match next {
            Some(WatchScript::Events(items)) => Ok(stream::iter(items).boxed()),
            Some(WatchScript::Fail(err)) => Err(err),
            Some(WatchScript::Channel(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            // Nothing scripted: stay open and silent
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Publisher remembering every (type, reason, object name)
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(String, String, String)>>,
}

impl RecordingPublisher {
    pub fn reasons(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.published.lock().unwrap().push((
            format!("{type_:?}"),
            reason.to_string(),
            resource_ref.name.clone().unwrap_or_default(),
        ));
    }
}

pub fn selector(label: &str, value: Option<&str>) -> Selector {
    Selector {
        label: label.to_string(),
        label_value: value.map(str::to_string),
        kinds: ResourceKinds::Both,
        namespaces: None,
        names: BTreeSet::new(),
    }
}

pub fn fast_settings() -> LoopSettings {
    LoopSettings {
        client_timeout: Duration::from_secs(30),
        restart_delay: Duration::from_millis(1),
        backoff_start: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        max_retries: None,
    }
}

pub fn reconciler(
    api: FakeApi,
    selector: Selector,
    folder: &Path,
    events: Arc<dyn EventPublisher>,
    settings: &LoopSettings,
) -> KindReconciler {
    KindReconciler::new(
        Box::new(api),
        Arc::new(selector),
        Arc::new(FileMaterializer::new(folder, 0o644, TARGET_DIR_ANNOTATION)),
        events,
        settings,
    )
}

/// ConfigMap fixture, deserialized like the API server would send it
pub fn configmap(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    data: &[(&str, &str)],
    resource_version: &str,
) -> WatchedResource {
    let labels: BTreeMap<&str, &str> = labels.iter().copied().collect();
    let data: BTreeMap<&str, &str> = data.iter().copied().collect();
    let cm: ConfigMap = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": resource_version,
            "labels": labels,
        },
        "data": data,
    }))
    .expect("valid ConfigMap fixture");
    cm.into_watched()
}

pub fn secret(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    data: &[(&str, &[u8])],
    resource_version: &str,
) -> WatchedResource {
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some(resource_version.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..ObjectMeta::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.to_vec())))
                .collect(),
        ),
        ..Secret::default()
    };
    secret.into_watched()
}

/// Every regular file under `root`, keyed by its path relative to `root`
pub fn files_under(root: &Path) -> BTreeMap<String, String> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            let content = std::fs::read_to_string(e.path()).unwrap();
            (relative, content)
        })
        .collect()
}

/// Poll `condition` until it holds, failing the test after a few seconds
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}
