//! # Selection
//!
//! Pure predicates deciding whether an observed object is in scope.
//!
//! `is_selected` is the conjunction of two independent checks:
//! - [`Selector::label_matches`]: the configured label key is present (and carries the
//!   configured value, when one is set)
//! - [`Selector::resource_is_desired`]: the kind is enabled, the namespace is watched and
//!   the name is in the allow-set (or the allow-set is "all")
//!
//! Neither check can fail; anything missing or malformed evaluates to `false`.

use crate::controller::resource::{ResourceKind, WatchedResource};
use std::collections::BTreeSet;

/// Which resource kinds are materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ResourceKinds {
    #[value(name = "configmap")]
    ConfigMap,
    #[value(name = "secret")]
    Secret,
    #[value(name = "both")]
    Both,
}

impl ResourceKinds {
    #[must_use]
    pub fn includes(self, kind: ResourceKind) -> bool {
        matches!(
            (self, kind),
            (ResourceKinds::Both, _)
                | (ResourceKinds::ConfigMap, ResourceKind::ConfigMap)
                | (ResourceKinds::Secret, ResourceKind::Secret)
        )
    }

    /// Enabled kinds in a stable order
    #[must_use]
    pub fn kinds(self) -> Vec<ResourceKind> {
        [ResourceKind::ConfigMap, ResourceKind::Secret]
            .into_iter()
            .filter(|k| self.includes(*k))
            .collect()
    }
}

/// Allow-set entry from `RESOURCE_NAMES`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum DesiredName {
    /// `name`: matches in any watched namespace
    Any(String),
    /// `namespace/name`
    Namespaced { namespace: String, name: String },
}

impl DesiredName {
    /// Parse a single entry, `None` for blanks and malformed `a/b/c` entries
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.split_once('/') {
            None => Some(DesiredName::Any(raw.to_string())),
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Some(DesiredName::Namespaced {
                    namespace: ns.to_string(),
                    name: name.to_string(),
                })
            }
            Some(_) => None,
        }
    }

    fn matches(&self, namespace: &str, name: &str) -> bool {
        match self {
            DesiredName::Any(n) => n == name,
            DesiredName::Namespaced {
                namespace: ns,
                name: n,
            } => ns == namespace && n == name,
        }
    }
}

/// Immutable selection state shared by every reconciliation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub label: String,
    pub label_value: Option<String>,
    pub kinds: ResourceKinds,
    /// `None` means every namespace (cluster-wide scope)
    pub namespaces: Option<BTreeSet<String>>,
    /// Empty means every name
    pub names: BTreeSet<DesiredName>,
}

impl Selector {
    #[must_use]
    pub fn label_matches(&self, resource: &WatchedResource) -> bool {
        if self.label.is_empty() {
            return false;
        }
        match (resource.labels.get(&self.label), &self.label_value) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
        }
    }

    #[must_use]
    pub fn resource_is_desired(&self, resource: &WatchedResource) -> bool {
        if !self.kinds.includes(resource.kind) || resource.name.is_empty() {
            return false;
        }
        if let Some(namespaces) = &self.namespaces {
            if !namespaces.contains(&resource.namespace) {
                return false;
            }
        }
        self.names.is_empty()
            || self
                .names
                .iter()
                .any(|d| d.matches(&resource.namespace, &resource.name))
    }

    #[must_use]
    pub fn is_selected(&self, resource: &WatchedResource) -> bool {
        self.label_matches(resource) && self.resource_is_desired(resource)
    }

    /// Server-side label selector pushed down to list/watch calls
    #[must_use]
    pub fn label_selector(&self) -> String {
        match &self.label_value {
            Some(value) => format!("{}={}", self.label, value),
            None => self.label.clone(),
        }
    }
}

/// Parse the comma separated `RESOURCE_NAMES` entries; `all` anywhere means no restriction
#[must_use]
pub fn parse_desired_names(entries: &[String]) -> BTreeSet<DesiredName> {
    if entries.iter().any(|e| e.trim().eq_ignore_ascii_case("all")) {
        return BTreeSet::new();
    }
    entries.iter().filter_map(|e| DesiredName::parse(e)).collect()
}
