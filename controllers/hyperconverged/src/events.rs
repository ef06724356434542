//! Kubernetes Event emission
//!
//! Reconcilers report through the [`EventEmitter`] trait so that passes can
//! be tested without an API server; [`KubeEventEmitter`] publishes through
//! the kube-runtime `Recorder`.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Event reasons used by the engine
pub mod reasons {
    pub const CREATED: &str = "Created";
    pub const UPDATED: &str = "Updated";
    pub const OVERWRITTEN: &str = "Overwritten";
    pub const KILLING: &str = "Killing";
    pub const INIT_HCO: &str = "InitHCO";
    pub const UPGRADE_HCO: &str = "UpgradeHCO";
    pub const RECONCILE_HCO: &str = "ReconcileHCO";
}

#[async_trait::async_trait]
pub trait EventEmitter: Send + Sync {
    /// Publish an event on `target`. Failures are logged, never returned.
    async fn emit(&self, target: &ObjectReference, type_: EventType, reason: &str, message: &str);
}

pub struct KubeEventEmitter {
    client: Client,
    reporter: Reporter,
}

impl KubeEventEmitter {
    pub fn new(client: Client, controller: &str, instance: Option<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.into(),
                instance,
            },
        }
    }
}

impl std::fmt::Debug for KubeEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventEmitter")
            .field("reporter", &self.reporter)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl EventEmitter for KubeEventEmitter {
    async fn emit(&self, target: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: reason.to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(&event, target).await {
            warn!("Failed to publish {} event: {}", reason, e);
        }
    }
}

/// Records events in memory; used by the reconciler tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    events: std::sync::Mutex<Vec<RecordedEvent>>,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub message: String,
}

#[cfg(test)]
impl RecordingEmitter {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|e| e.reason == reason).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl EventEmitter for RecordingEmitter {
    async fn emit(&self, _target: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        self.events.lock().unwrap().push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
