//! Kubernetes Event recording
//!
//! The build pipeline is synchronous, so it records events through the
//! non-blocking [`EventRecorder`] capability. The production implementation
//! queues events on a channel drained by a task that publishes them with
//! `kube::runtime::events::Recorder`. Publishing is fire-and-forget: a failed
//! event is logged and never breaks reconciliation.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capability to attach a warning/info event to a Kubernetes object
#[cfg_attr(test, mockall::automock)]
pub trait EventRecorder: Send + Sync {
    /// Record an event on `object`. Must not block.
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str);
}

/// Well-known event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// A backend references a Service that is not in the cache
    pub const SERVICE_NOT_FOUND: &str = "ServiceNotFound";
    /// A backend's service port could not be mapped to a target port
    pub const PORT_RESOLUTION_ERROR: &str = "PortResolutionError";
    /// Endpoints do not expose the resolved backend port
    pub const ENDPOINTS_PORT_MISMATCH: &str = "EndpointsPortMismatch";
    /// A TLS section references a Secret that is not in the cache
    pub const SECRET_NOT_FOUND: &str = "SecretNotFound";
    /// A pre- or post-build validator rejected the configuration
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// The gateway configuration was applied
    pub const GATEWAY_UPDATED: &str = "GatewayUpdated";
}

/// Action reported with every event
const ACTION: &str = "Reconcile";

#[derive(Debug)]
struct PendingEvent {
    object: ObjectReference,
    event_type: EventType,
    reason: String,
    message: String,
}

/// Production recorder backed by `kube::runtime::events::Recorder`
#[derive(Clone)]
pub struct KubeEventRecorder {
    tx: mpsc::UnboundedSender<PendingEvent>,
}

impl KubeEventRecorder {
    /// Create the recorder and spawn the task that publishes queued events.
    ///
    /// The controller name appears as the "reportingComponent" on events.
    pub fn spawn(client: Client, controller_name: &str) -> (Self, JoinHandle<()>) {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        let recorder = Recorder::new(client, reporter);
        let (tx, mut rx) = mpsc::unbounded_channel::<PendingEvent>();

        let handle = tokio::spawn(async move {
            while let Some(pending) = rx.recv().await {
                let event = Event {
                    type_: pending.event_type,
                    reason: pending.reason.clone(),
                    note: Some(pending.message),
                    action: ACTION.to_string(),
                    secondary: None,
                };
                if let Err(e) = recorder.publish(&event, &pending.object).await {
                    warn!(
                        reason = %pending.reason,
                        error = %e,
                        "Failed to publish Kubernetes event"
                    );
                }
            }
            debug!("Event recorder channel closed");
        });

        (Self { tx }, handle)
    }
}

impl EventRecorder for KubeEventRecorder {
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        let pending = PendingEvent {
            object: object.clone(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        };
        if self.tx.send(pending).is_err() {
            warn!(reason, "Event recorder is shut down, dropping event");
        }
    }
}
