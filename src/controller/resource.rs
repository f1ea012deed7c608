//! # Watched Resources
//!
//! Kind-agnostic view of the ConfigMaps and Secrets the sidecar materializes.
//!
//! Both kinds are flattened into a [`WatchedResource`] as soon as they leave the
//! Kubernetes client, so selection, materialization and the reconciliation loop
//! never branch on the concrete `k8s-openapi` type.

use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Secret};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::fmt;

/// The two built-in kinds the sidecar understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    ConfigMap,
    Secret,
}

impl ResourceKind {
    /// Kubernetes `kind` string
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Secret => "Secret",
        }
    }

    /// Directory segment used in the on-disk layout
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "configmap",
            ResourceKind::Secret => "secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a resource: `(kind, namespace, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A ConfigMap or Secret as observed by a single list or watch event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedResource {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Data entries, already decoded to raw bytes
    pub data: BTreeMap<String, Vec<u8>>,
    pub resource_version: Option<String>,
}

impl WatchedResource {
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind, self.namespace.clone(), self.name.clone())
    }

    /// Reference used when posting Kubernetes Events about this object
    #[must_use]
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some(self.kind.as_str().to_string()),
            namespace: Some(self.namespace.clone()),
            name: Some(self.name.clone()),
            uid: self.uid.clone(),
            resource_version: self.resource_version.clone(),
            ..Default::default()
        }
    }
}

/// Conversion from a typed Kubernetes object into a [`WatchedResource`]
pub trait IntoWatched {
    const KIND: ResourceKind;

    fn into_watched(self) -> WatchedResource;
}

fn base_resource<K: ResourceExt>(kind: ResourceKind, obj: &K) -> WatchedResource {
    WatchedResource {
        kind,
        namespace: obj.namespace().unwrap_or_default(),
        name: obj.name_any(),
        uid: obj.uid(),
        labels: obj.labels().clone(),
        annotations: obj.annotations().clone(),
        data: BTreeMap::new(),
        resource_version: obj.resource_version(),
    }
}

impl IntoWatched for ConfigMap {
    const KIND: ResourceKind = ResourceKind::ConfigMap;

    fn into_watched(self) -> WatchedResource {
        let mut resource = base_resource(Self::KIND, &self);
        if let Some(data) = self.data {
            resource
                .data
                .extend(data.into_iter().map(|(k, v)| (k, v.into_bytes())));
        }
        // The API server rejects keys present in both maps, binaryData simply goes last
        if let Some(binary) = self.binary_data {
            resource
                .data
                .extend(binary.into_iter().map(|(k, v)| (k, v.0)));
        }
        resource
    }
}

impl IntoWatched for Secret {
    const KIND: ResourceKind = ResourceKind::Secret;

    fn into_watched(self) -> WatchedResource {
        let mut resource = base_resource(Self::KIND, &self);
        // ByteString deserialization has already undone the base64 encoding
        if let Some(data) = self.data {
            resource
                .data
                .extend(data.into_iter().map(|(k, v)| (k, v.0)));
        }
        resource
    }
}
