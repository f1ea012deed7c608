//! # Controller
//!
//! Watches ConfigMaps and Secrets and keeps their files on disk in sync.
//!
//! - `source`: list/watch access to the Kubernetes API
//! - `selection` / `scope`: what is watched and what is materialized
//! - `materializer`: file layout, atomic writes and removal
//! - `reconciler`: the per-kind list/watch state machine
//! - `error_policy` / `backoff`: API error classification and retry delays
//! - `events`: optional Kubernetes Events

pub mod backoff;
pub mod error_policy;
pub mod events;
pub mod materializer;
pub mod reconciler;
pub mod resource;
pub mod scope;
pub mod selection;
pub mod source;
