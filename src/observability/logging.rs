//! # Logging
//!
//! `tracing` subscriber setup. `RUST_LOG` always wins; otherwise the filter is
//! derived from the `DEBUG` and `VERBOSE` switches.

use crate::config::LogFormat;
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Filter directives used when `RUST_LOG` is not set
#[must_use]
pub fn default_directives(debug: bool, verbose: bool) -> String {
    let mut directives = String::from("info");
    if debug {
        directives.push_str(",k8s_file_sidecar=debug");
    }
    if verbose {
        directives.push_str(",kube=debug,kube_runtime=debug");
    }
    directives
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(format: LogFormat, debug: bool, verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug, verbose)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow!("Failed to initialize tracing subscriber: {e}"))
}
