//! # Resource Source
//!
//! The list/watch surface the reconciliation loop drives.
//!
//! [`ResourceApi`] is the seam between the loop and the cluster. The production
//! implementation [`KubeResourceApi`] issues raw `list` and `watch` calls through
//! `kube::Api` and leaves resourceVersion tracking, reconnects and backoff to the
//! loop itself. Tests plug in an in-memory implementation.

use crate::controller::error_policy::{classify_kube_error, classify_status, ApiError};
use crate::controller::resource::{IntoWatched, ResourceKind, WatchedResource};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::debug;

/// A consistent listing of every object in scope
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub items: Vec<WatchedResource>,
    /// Point in history the listing represents; the watch resumes from here
    pub resource_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    Added(WatchedResource),
    Modified(WatchedResource),
    Deleted(WatchedResource),
    /// Progress marker carrying only a resourceVersion
    Bookmark(String),
}

impl ResourceEvent {
    #[must_use]
    pub fn resource_version(&self) -> Option<&str> {
        match self {
            ResourceEvent::Added(r) | ResourceEvent::Modified(r) | ResourceEvent::Deleted(r) => {
                r.resource_version.as_deref()
            }
            ResourceEvent::Bookmark(rv) => Some(rv),
        }
    }

    #[must_use]
    pub fn type_str(&self) -> &'static str {
        match self {
            ResourceEvent::Added(_) => "added",
            ResourceEvent::Modified(_) => "modified",
            ResourceEvent::Deleted(_) => "deleted",
            ResourceEvent::Bookmark(_) => "bookmark",
        }
    }
}

pub type EventStream = BoxStream<'static, Result<ResourceEvent, ApiError>>;

/// List/watch access to one resource kind within one scope target
#[async_trait]
pub trait ResourceApi: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Namespace this source is restricted to, `None` when cluster-wide
    fn namespace(&self) -> Option<&str>;

    async fn list(&self) -> Result<Snapshot, ApiError>;

    async fn watch(&self, resource_version: &str) -> Result<EventStream, ApiError>;
}

/// Page size for list calls
const LIST_PAGE_SIZE: u32 = 500;

pub struct KubeResourceApi<K> {
    api: Api<K>,
    namespace: Option<String>,
    label_selector: String,
    server_timeout_secs: u32,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Debug for KubeResourceApi<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceApi")
            .field("namespace", &self.namespace)
            .field("label_selector", &self.label_selector)
            .field("server_timeout_secs", &self.server_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl<K> KubeResourceApi<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + IntoWatched
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    pub fn new(
        client: Client,
        namespace: Option<String>,
        label_selector: impl Into<String>,
        server_timeout_secs: u32,
    ) -> Self {
        let api = match &namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        Self {
            api,
            namespace,
            label_selector: label_selector.into(),
            server_timeout_secs,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K> ResourceApi for KubeResourceApi<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + IntoWatched
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    fn kind(&self) -> ResourceKind {
        K::KIND
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    async fn list(&self) -> Result<Snapshot, ApiError> {
        let mut params = ListParams::default()
            .labels(&self.label_selector)
            .limit(LIST_PAGE_SIZE);
        let mut snapshot = Snapshot::default();

        loop {
            let page = self
                .api
                .list(&params)
                .await
                .map_err(|e| classify_kube_error(&e))?;

            snapshot.resource_version = page.metadata.resource_version.clone().unwrap_or_default();
            snapshot
                .items
                .extend(page.items.into_iter().map(IntoWatched::into_watched));

            match page.metadata.continue_.as_deref() {
                Some(token) if !token.is_empty() => {
                    debug!(kind = %K::KIND, fetched = snapshot.items.len(), "list.page");
                    params = params.continue_token(token);
                }
                _ => break,
            }
        }

        Ok(snapshot)
    }

    async fn watch(&self, resource_version: &str) -> Result<EventStream, ApiError> {
        // Bookmarks are requested by default
        let params = WatchParams::default()
            .labels(&self.label_selector)
            .timeout(self.server_timeout_secs);

        let stream = self
            .api
            .watch(&params, resource_version)
            .await
            .map_err(|e| classify_kube_error(&e))?;

        Ok(stream
            .map(|item| match item {
                Ok(WatchEvent::Added(obj)) => Ok(ResourceEvent::Added(obj.into_watched())),
                Ok(WatchEvent::Modified(obj)) => Ok(ResourceEvent::Modified(obj.into_watched())),
                Ok(WatchEvent::Deleted(obj)) => Ok(ResourceEvent::Deleted(obj.into_watched())),
                Ok(WatchEvent::Bookmark(bookmark)) => {
                    Ok(ResourceEvent::Bookmark(bookmark.metadata.resource_version))
                }
                Ok(WatchEvent::Error(status)) => Err(classify_status(status.code, &status.message)),
                Err(e) => Err(classify_kube_error(&e)),
            })
            .boxed())
    }
}
