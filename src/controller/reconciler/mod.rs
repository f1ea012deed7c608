//! # Reconciler
//!
//! One [`KindReconciler`] keeps the files of one resource kind within one scope
//! target (a namespace, or the whole cluster) in line with the cluster.
//!
//! ```text
//! Initializing -> Listing -> Streaming <-> Reconnecting -> Stopped
//!                    ^                          |
//!                    +------ 410 Gone ----------+
//! ```
//!
//! - **Listing** lists every object in scope, writes the selected ones and removes
//!   files of identities that are gone or no longer selected. The first
//!   successful listing reports readiness.
//! - **Streaming** watches from the listing's resourceVersion and applies each
//!   event through [`dispatch::decide`].
//! - **Reconnecting** resumes the watch from the last seen resourceVersion, goes
//!   back to Listing when that version expired, and backs off on transient
//!   errors. Fatal errors end the loop.
//!
//! Events are applied one at a time, so all operations on one identity are
//! serialised in delivery order.

pub mod dispatch;

use crate::controller::backoff::ExponentialBackoff;
use crate::controller::error_policy::ApiError;
use crate::controller::events::{actions, reasons, EventPublisher};
use crate::controller::materializer::{content_fingerprint, FileMaterializer, MaterializeError};
use crate::controller::resource::{ResourceKey, ResourceKind, WatchedResource};
use crate::controller::selection::Selector;
use crate::controller::source::{ResourceApi, ResourceEvent};
use crate::observability::metrics;
use crate::runtime::signals::{ReadyToken, StopFlag};
use dispatch::{decide, Action, EventKind};
use futures::StreamExt;
use kube::runtime::events::EventType;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Tunables shared by every loop
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Abandon a watch stream that delivered nothing for this long
    pub client_timeout: Duration,
    /// Pause before reopening a watch that ended, doubled up to `backoff_max`
    /// while streams keep ending empty
    pub restart_delay: Duration,
    pub backoff_start: Duration,
    pub backoff_max: Duration,
    /// Consecutive failures tolerated before giving up, `None` for unlimited
    pub max_retries: Option<u32>,
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Fatal(ApiError),
    #[error("giving up after {retries} retries: {last}")]
    RetriesExhausted { retries: u32, last: ApiError },
}

impl LoopError {
    /// The API error that ended the loop
    #[must_use]
    pub fn api_error(&self) -> &ApiError {
        match self {
            LoopError::Fatal(e) | LoopError::RetriesExhausted { last: e, .. } => e,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Initializing,
    Listing,
    Streaming,
    Reconnecting(ReconnectCause),
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectCause {
    /// Server closed the stream, usually its own timeout
    StreamEnded,
    /// Nothing arrived within the client timeout
    ClientTimeout,
    /// The resume resourceVersion is too old
    Expired,
    Transient(ApiError),
}

impl ReconnectCause {
    fn as_str(&self) -> &'static str {
        match self {
            ReconnectCause::StreamEnded => "stream_ended",
            ReconnectCause::ClientTimeout => "client_timeout",
            ReconnectCause::Expired => "expired",
            ReconnectCause::Transient(_) => "transient",
        }
    }

    fn from_api_error(err: ApiError) -> Self {
        if err.is_expired() {
            ReconnectCause::Expired
        } else {
            ReconnectCause::Transient(err)
        }
    }
}

/// Files currently on disk for one identity
#[derive(Debug, Clone)]
struct Materialized {
    dir: PathBuf,
    /// `None` when the content is unknown (found on disk, or a failed write)
    fingerprint: Option<String>,
}

pub struct KindReconciler {
    api: Box<dyn ResourceApi>,
    selector: Arc<Selector>,
    materializer: Arc<FileMaterializer>,
    events: Arc<dyn EventPublisher>,
    backoff: ExponentialBackoff,
    restart_backoff: ExponentialBackoff,
    client_timeout: Duration,
    index: BTreeMap<ResourceKey, Materialized>,
    resource_version: String,
    seeded: bool,
}

impl std::fmt::Debug for KindReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindReconciler")
            .field("kind", &self.kind())
            .field("namespace", &self.api.namespace())
            .field("materialized", &self.index.len())
            .field("resource_version", &self.resource_version)
            .finish_non_exhaustive()
    }
}

impl KindReconciler {
    pub fn new(
        api: Box<dyn ResourceApi>,
        selector: Arc<Selector>,
        materializer: Arc<FileMaterializer>,
        events: Arc<dyn EventPublisher>,
        settings: &LoopSettings,
    ) -> Self {
        Self {
            api,
            selector,
            materializer,
            events,
            backoff: ExponentialBackoff::new(
                settings.backoff_start,
                settings.backoff_max,
                settings.max_retries,
            ),
            restart_backoff: ExponentialBackoff::new(settings.restart_delay, settings.backoff_max, None),
            client_timeout: settings.client_timeout,
            index: BTreeMap::new(),
            resource_version: String::new(),
            seeded: false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.api.kind()
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.api.namespace()
    }

    /// Human readable scope target, `*` when cluster-wide
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}/{}", self.kind(), self.api.namespace().unwrap_or("*"))
    }

    /// Identities with files on disk, as tracked by this loop
    #[must_use]
    pub fn materialized(&self) -> Vec<ResourceKey> {
        self.index.keys().cloned().collect()
    }

    /// Run until stopped or until an unrecoverable error.
    ///
    /// `ready` is reported after the first successful listing.
    pub async fn run(mut self, stop: StopFlag, mut ready: ReadyToken) -> Result<(), LoopError> {
        let mut state = WatchState::Initializing;
        loop {
            if stop.is_set() && state != WatchState::Stopped {
                state = WatchState::Stopped;
            }
            debug!(target_scope = %self.target(), ?state, "watch.state");

            state = match state {
                WatchState::Initializing => {
                    info!(
                        target_scope = %self.target(),
                        selector = %self.selector.label_selector(),
                        "Starting reconciliation loop"
                    );
                    WatchState::Listing
                }
                WatchState::Listing => {
                    let result = tokio::select! {
                        () = stop.wait() => None,
                        result = self.list_pass() => Some(result),
                    };
                    match result {
                        None => WatchState::Stopped,
                        Some(Ok(())) => {
                            self.backoff.reset();
                            ready.report();
                            WatchState::Streaming
                        }
                        Some(Err(e)) if e.is_fatal() => return Err(LoopError::Fatal(e)),
                        Some(Err(e)) => {
                            self.back_off(&stop, e).await?;
                            WatchState::Listing
                        }
                    }
                }
                WatchState::Streaming => self.stream(&stop).await?,
                WatchState::Reconnecting(cause) => {
                    metrics::increment_watch_restarts(self.kind().as_str(), cause.as_str());
                    match cause {
                        ReconnectCause::Expired => {
                            info!(
                                target_scope = %self.target(),
                                resource_version = %self.resource_version,
                                "Watch resourceVersion expired, relisting"
                            );
                            WatchState::Listing
                        }
                        ReconnectCause::StreamEnded | ReconnectCause::ClientTimeout => {
                            let delay = self.restart_backoff.next_delay();
                            debug!(
                                target_scope = %self.target(),
                                cause = cause.as_str(),
                                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                "Resuming watch"
                            );
                            if sleep_or_stop(&stop, delay).await {
                                WatchState::Streaming
                            } else {
                                WatchState::Stopped
                            }
                        }
                        ReconnectCause::Transient(e) => {
                            self.back_off(&stop, e).await?;
                            WatchState::Streaming
                        }
                    }
                }
                WatchState::Stopped => {
                    info!(target_scope = %self.target(), "Reconciliation loop stopped");
                    return Ok(());
                }
            };
        }
    }

    /// A single listing pass without watching or retrying.
    ///
    /// Returns the number of resources materialized afterwards.
    pub async fn list_once(mut self) -> Result<usize, ApiError> {
        self.list_pass().await?;
        Ok(self.index.len())
    }

    async fn list_pass(&mut self) -> Result<(), ApiError> {
        let snapshot = self.api.list().await?;
        let kind = self.kind();
        metrics::increment_resyncs(kind.as_str());

        if !self.seeded {
            self.seed_from_disk().await;
        }

        let mut listed = BTreeSet::new();
        for item in &snapshot.items {
            listed.insert(item.key());
            self.apply(EventKind::Resume, item).await;
        }

        let vanished: Vec<ResourceKey> = self
            .index
            .keys()
            .filter(|key| !listed.contains(*key))
            .cloned()
            .collect();
        for key in &vanished {
            debug!(resource = %key, "Resource no longer present, removing files");
            self.delete(key, None).await;
        }

        self.resource_version = snapshot.resource_version;
        info!(
            target_scope = %self.target(),
            listed = snapshot.items.len(),
            materialized = self.index.len(),
            removed = vanished.len(),
            resource_version = %self.resource_version,
            "Listing complete"
        );
        Ok(())
    }

    /// Adopt identities already on disk so a listing can prune leftovers
    async fn seed_from_disk(&mut self) {
        let kind = self.kind();
        let namespace = self.api.namespace().map(str::to_string);
        let found = self
            .blocking(move |m| Ok(m.materialized_under(kind, namespace.as_deref())))
            .await
            .unwrap_or_else(|e| {
                warn!(target_scope = %self.target(), error = %e, "Could not enumerate output folder");
                Vec::new()
            });
        let mut adopted = 0_i64;
        for (key, dir) in found {
            if self.index.contains_key(&key) {
                continue;
            }
            self.index.insert(
                key,
                Materialized {
                    dir,
                    fingerprint: None,
                },
            );
            adopted += 1;
        }
        metrics::add_materialized_resources(kind.as_str(), adopted);
        if adopted > 0 {
            debug!(target_scope = %self.target(), adopted, "Found materialized resources on disk");
        }
        self.seeded = true;
    }

    async fn stream(&mut self, stop: &StopFlag) -> Result<WatchState, LoopError> {
        let mut stream = match self.api.watch(&self.resource_version).await {
            Ok(stream) => stream,
            Err(e) if e.is_fatal() => return Err(LoopError::Fatal(e)),
            Err(e) => return Ok(WatchState::Reconnecting(ReconnectCause::from_api_error(e))),
        };
        debug!(
            target_scope = %self.target(),
            resource_version = %self.resource_version,
            "watch.opened"
        );

        loop {
            let next = tokio::select! {
                biased;
                () = stop.wait() => return Ok(WatchState::Stopped),
                next = tokio::time::timeout(self.client_timeout, stream.next()) => next,
            };

            match next {
                Err(_elapsed) => return Ok(WatchState::Reconnecting(ReconnectCause::ClientTimeout)),
                Ok(None) => return Ok(WatchState::Reconnecting(ReconnectCause::StreamEnded)),
                Ok(Some(Err(e))) if e.is_fatal() => return Err(LoopError::Fatal(e)),
                Ok(Some(Err(e))) => {
                    warn!(target_scope = %self.target(), error = %e, "Watch stream error");
                    return Ok(WatchState::Reconnecting(ReconnectCause::from_api_error(e)));
                }
                Ok(Some(Ok(event))) => {
                    self.backoff.reset();
                    self.restart_backoff.reset();
                    self.handle_event(event).await;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: ResourceEvent) {
        metrics::increment_watch_events(self.kind().as_str(), event.type_str());
        let (kind, resource) = match event {
            ResourceEvent::Added(r) => (EventKind::Added, r),
            ResourceEvent::Modified(r) => (EventKind::Modified, r),
            ResourceEvent::Deleted(r) => (EventKind::Deleted, r),
            ResourceEvent::Bookmark(rv) => {
                debug!(target_scope = %self.target(), resource_version = %rv, "watch.bookmark");
                self.resource_version = rv;
                return;
            }
        };

        self.apply(kind, &resource).await;
        if let Some(rv) = resource.resource_version {
            self.resource_version = rv;
        }
    }

    /// Apply one event for one object
    async fn apply(&mut self, event: EventKind, resource: &WatchedResource) {
        let key = resource.key();
        let selected = self.selector.is_selected(resource);
        let materialized = self.index.contains_key(&key);

        match decide(event, selected, materialized) {
            Action::Write => self.write(event, resource).await,
            Action::Delete => self.delete(&key, Some(resource)).await,
            Action::Noop => debug!(resource = %key, event = event.as_str(), "Not selected, ignoring"),
        }
    }

    async fn write(&mut self, event: EventKind, resource: &WatchedResource) {
        let key = resource.key();
        let kind = key.kind.as_str();
        let fingerprint = content_fingerprint(&resource.data);
        let dir = match self.materializer.resource_dir(resource) {
            Ok(dir) => dir,
            Err(e) => return self.report_failure(resource, actions::WRITE, &e).await,
        };

        if let Some(existing) = self.index.get(&key) {
            if existing.dir == dir && existing.fingerprint.as_deref() == Some(fingerprint.as_str()) {
                debug!(resource = %key, event = event.as_str(), "Content unchanged, skipping write");
                return;
            }
            if existing.dir != dir {
                // Target directory annotation changed
                let old_dir = existing.dir.clone();
                let old_key = key.clone();
                let moved = self.blocking(move |m| m.delete_dir(&old_key, &old_dir)).await;
                if let Err(e) = moved {
                    self.report_failure(resource, actions::DELETE, &e).await;
                }
            }
        }

        let reason = event.write_reason();
        let owned = resource.clone();
        let result = self.blocking(move |m| m.write_resource(&owned, reason)).await;
        let previous = self.index.insert(
            key.clone(),
            Materialized {
                dir,
                fingerprint: result.as_ref().ok().map(|_| fingerprint),
            },
        );
        if previous.is_none() {
            metrics::add_materialized_resources(kind, 1);
        }

        match result {
            Ok(outcome) => {
                metrics::increment_files_written(kind, outcome.files_written);
                let note = format!(
                    "Wrote {} file(s) to {} ({})",
                    outcome.files_written,
                    outcome.dir.display(),
                    event.write_reason()
                );
                self.events
                    .publish(
                        &resource.object_reference(),
                        EventType::Normal,
                        reasons::MATERIALIZED,
                        actions::WRITE,
                        Some(note),
                    )
                    .await;
            }
            Err(e) => self.report_failure(resource, actions::WRITE, &e).await,
        }
    }

    /// Remove the files of an identity. `resource` is the last observed object, if any.
    async fn delete(&mut self, key: &ResourceKey, resource: Option<&WatchedResource>) {
        let dir = match (self.index.get(key), resource) {
            (Some(existing), _) => Ok(existing.dir.clone()),
            (None, Some(resource)) => self.materializer.resource_dir(resource),
            (None, None) => self.materializer.default_resource_dir(key),
        };
        let result = match dir {
            Ok(dir) => {
                let owned_key = key.clone();
                self.blocking(move |m| m.delete_dir(&owned_key, &dir)).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(removed) => {
                if self.index.remove(key).is_some() {
                    metrics::add_materialized_resources(key.kind.as_str(), -1);
                }
                if removed {
                    metrics::increment_resources_removed(key.kind.as_str());
                    if let Some(resource) = resource {
                        self.events
                            .publish(
                                &resource.object_reference(),
                                EventType::Normal,
                                reasons::REMOVED,
                                actions::DELETE,
                                None,
                            )
                            .await;
                    }
                }
            }
            Err(e) => match resource {
                Some(resource) => self.report_failure(resource, actions::DELETE, &e).await,
                None => {
                    metrics::increment_materialize_errors(key.kind.as_str());
                    error!(resource = %key, error = %e, "Failed to remove files");
                }
            },
        }
    }

    /// Run filesystem work on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> Result<T, MaterializeError>
    where
        F: FnOnce(&FileMaterializer) -> Result<T, MaterializeError> + Send + 'static,
        T: Send + 'static,
    {
        let materializer = Arc::clone(&self.materializer);
        tokio::task::spawn_blocking(move || op(&materializer))
            .await
            .unwrap_or_else(|e| Err(MaterializeError::Interrupted(e.to_string())))
    }

    async fn report_failure(&self, resource: &WatchedResource, action: &str, err: &MaterializeError) {
        metrics::increment_materialize_errors(resource.kind.as_str());
        error!(
            kind = resource.kind.as_str(),
            namespace = resource.namespace.as_str(),
            name = resource.name.as_str(),
            action,
            path = %err.path().map(|p| p.display().to_string()).unwrap_or_default(),
            error = %err,
            "File operation failed"
        );
        self.events
            .publish(
                &resource.object_reference(),
                EventType::Warning,
                reasons::MATERIALIZE_FAILED,
                action,
                Some(err.to_string()),
            )
            .await;
    }

    /// Sleep for the next backoff delay, or give up once the retry ceiling is hit.
    ///
    /// Returns early when stop is requested; the caller's next state check sees it.
    async fn back_off(&mut self, stop: &StopFlag, err: ApiError) -> Result<(), LoopError> {
        let Some(delay) = self.backoff.next_backoff() else {
            let retries = self.backoff.attempts().saturating_sub(1);
            error!(target_scope = %self.target(), retries, error = %err, "Retries exhausted");
            return Err(LoopError::RetriesExhausted { retries, last: err });
        };
        warn!(
            target_scope = %self.target(),
            attempt = self.backoff.attempts(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Kubernetes API call failed, retrying"
        );
        sleep_or_stop(stop, delay).await;
        Ok(())
    }
}

/// Sleep for `delay` unless stop is requested first. Returns `false` when stopped.
async fn sleep_or_stop(stop: &StopFlag, delay: Duration) -> bool {
    tokio::select! {
        () = stop.wait() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
