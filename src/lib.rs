//! Kubernetes File Sidecar Library
//!
//! Watches labelled ConfigMaps and Secrets and materializes their data as files
//! on a shared volume. The binary in `main.rs` only parses configuration and
//! calls [`runtime::run`].

pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod runtime;
pub mod server;
