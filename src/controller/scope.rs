//! # Scope
//!
//! Cluster-wide versus namespaced watching, resolved once from configuration.

use std::collections::BTreeSet;

/// Namespace scope of the sidecar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub clusterwide: bool,
    pub namespaces: BTreeSet<String>,
}

impl Scope {
    /// Namespaces as seen by the selector, `None` when cluster-wide
    #[must_use]
    pub fn namespace_filter(&self) -> Option<BTreeSet<String>> {
        (!self.clusterwide).then(|| self.namespaces.clone())
    }

    /// One entry per list/watch target: `None` is the cluster-wide target
    #[must_use]
    pub fn targets(&self) -> Vec<Option<String>> {
        if self.clusterwide {
            vec![None]
        } else {
            self.namespaces.iter().cloned().map(Some).collect()
        }
    }
}

/// Resolve the watch scope from the configured namespace list.
///
/// Blank entries are ignored. An empty list, or one containing `ALL`
/// (any case), means cluster-wide.
#[must_use]
pub fn resolve_scope(configured: &[String]) -> Scope {
    let namespaces: BTreeSet<String> = configured
        .iter()
        .map(|ns| ns.trim())
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
        .collect();

    if namespaces.is_empty() || namespaces.iter().any(|ns| ns.eq_ignore_ascii_case("all")) {
        Scope {
            clusterwide: true,
            namespaces: BTreeSet::new(),
        }
    } else {
        Scope {
            clusterwide: false,
            namespaces,
        }
    }
}
