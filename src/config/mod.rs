//! # Configuration
//!
//! Startup configuration read from the command line and environment.

pub mod sidecar;

pub use sidecar::{Cli, ConfigError, LogFormat, Method, SidecarConfig};
