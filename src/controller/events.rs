//! # Kubernetes Events
//!
//! Optional Kubernetes Events describing file operations, visible through
//! `kubectl describe` on the source ConfigMap or Secret.
//!
//! Publishing is fire-and-forget: a failed event is logged and never breaks
//! reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::{debug, warn};

/// Reason strings shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// Files written for the resource
    pub const MATERIALIZED: &str = "Materialized";
    /// Files removed after deletion or deselection
    pub const REMOVED: &str = "Removed";
    /// Writing or removing files failed
    pub const MATERIALIZE_FAILED: &str = "MaterializeFailed";
}

/// Action strings shown in the ACTION column
pub mod actions {
    pub const WRITE: &str = "WriteFiles";
    pub const DELETE: &str = "DeleteFiles";
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventPublisher").finish_non_exhaustive()
    }
}

impl KubeEventPublisher {
    /// `controller_name` becomes the reportingComponent of every Event
    #[must_use]
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        match self.recorder.publish(&event, resource_ref).await {
            Ok(()) => debug!(reason, action, "event.published"),
            Err(e) => warn!(reason, action, error = %e, "Failed to publish Kubernetes event"),
        }
    }
}

/// Publisher used when event logging is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}
