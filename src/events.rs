//! Kubernetes Event recording for the IPPool controller
//!
//! Events are fire-and-forget: a failed publish is logged as a warning and
//! never affects the outcome of a reconciliation pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on the given object
    ///
    /// * `reason` - machine-readable reason (see [`reasons`])
    /// * `action` - what the controller was doing (see [`actions`])
    /// * `note` - optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
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
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish Kubernetes event");
        }
    }
}

/// Event reasons emitted by the IPPool controller
pub mod reasons {
    /// The pool or its owning cluster is paused
    pub const PAUSED: &str = "Paused";
    /// The owning cluster does not exist (yet)
    pub const OWNER_NOT_FOUND: &str = "OwnerNotFound";
    /// All addresses were released and the finalizer was removed
    pub const FINALIZER_REMOVED: &str = "FinalizerRemoved";
    /// The pass failed with a non-retryable pool manager or API error
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

/// Event actions emitted by the IPPool controller
pub mod actions {
    /// Standard reconciliation pass
    pub const RECONCILE: &str = "Reconcile";
    /// Deletion path
    pub const DELETE: &str = "Delete";
}
