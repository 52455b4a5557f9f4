//! Kubernetes Event recording for the COSI controllers.
//!
//! Events are how a user learns why a claim or access request is stuck: a
//! missing class, a missing adoption target or an unready claim all show up in
//! `kubectl describe`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never change a reconcile outcome.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on the given object.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason, one of [`reasons`]
    /// * `action` - What the controller was doing, one of [`actions`]
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`
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
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every event.
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

/// Well-known event reason strings.
pub mod reasons {
    /// Bucket provisioning failed for a reason retrying will not fix
    pub const FAILED_CREATE_BUCKET: &str = "FailedCreateBucket";
    /// A new Bucket was created and bound to the claim
    pub const BUCKET_PROVISIONED: &str = "BucketProvisioned";
    /// A pre-existing Bucket was bound to the claim
    pub const BUCKET_ADOPTED: &str = "BucketAdopted";
    /// The access request is waiting for its claim to become ready
    pub const WAITING_FOR_BUCKET: &str = "WaitingForBucket";
    /// Access provisioning failed for a reason retrying will not fix
    pub const FAILED_GRANT_ACCESS: &str = "FailedGrantAccess";
    /// A BucketAccess was created and bound to the request
    pub const ACCESS_GRANTED: &str = "AccessGranted";
    /// The claim's Bucket was deleted
    pub const BUCKET_DELETED: &str = "BucketDeleted";
    /// The claim's Bucket was kept because of its Retain policy
    pub const BUCKET_RETAINED: &str = "BucketRetained";
    /// The request's BucketAccess was deleted
    pub const BUCKET_ACCESS_DELETED: &str = "BucketAccessDeleted";
    /// Cleanup of a deleting claim failed for a reason retrying will not fix
    pub const FAILED_DELETE_BUCKET: &str = "FailedDeleteBucket";
    /// Cleanup of a deleting access request failed for a reason retrying will not fix
    pub const FAILED_REVOKE_ACCESS: &str = "FailedRevokeAccess";
}

/// Well-known event action strings.
pub mod actions {
    /// Creating or adopting a Bucket
    pub const PROVISION: &str = "Provision";
    /// Creating a BucketAccess
    pub const GRANT: &str = "Grant";
    /// Cleaning up on request deletion
    pub const DELETE: &str = "Delete";
}

/// A single event captured by [`RecordingEventPublisher`]
#[cfg(test)]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    /// Name of the object the event was published on
    pub object: String,
    /// "Normal" or "Warning"
    pub type_: String,
    /// Event reason
    pub reason: String,
    /// Event action
    pub action: String,
    /// Event note
    pub note: Option<String>,
}

/// Publisher that keeps every event in memory
#[cfg(test)]
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: std::sync::Mutex<Vec<RecordedEvent>>,
}

#[cfg(test)]
impl RecordingEventPublisher {
    /// Events published so far, oldest first
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Reasons published so far, oldest first
    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[cfg(test)]
#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let type_ = match type_ {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        };
        self.events.lock().unwrap().push(RecordedEvent {
            object: resource_ref.name.clone().unwrap_or_default(),
            type_: type_.to_string(),
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}
