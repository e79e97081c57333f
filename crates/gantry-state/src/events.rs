//! Cluster event emission.
//!
//! The provisioner surfaces scheduling outcomes as events rather than
//! errors: a deferred pod is normal operation, not a failure. The daemon
//! records through [`TracingRecorder`]; tests assert with
//! [`CapturingRecorder`].

use std::sync::Mutex;

use tracing::{debug, info};

use crate::types::PodId;

/// An event the provisioner emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The pod was deferred: either its target node is not ready for it,
    /// or no provisioner admits it. The upstream scheduler should retry.
    PodShouldSchedule { pod: PodId, node: Option<String> },
    /// The pod failed precondition checks and was skipped for this pass.
    PodFailedValidation { pod: PodId, reason: String },
    /// A launch was aborted because it would cross the provisioner's
    /// resource ceiling.
    ProvisionerLimitExceeded { provisioner: String, reason: String },
}

/// Sink for provisioner events.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);

    fn pod_should_schedule(&self, pod: &str, node: Option<&str>) {
        self.record(Event::PodShouldSchedule {
            pod: pod.to_string(),
            node: node.map(|n| n.to_string()),
        });
    }

    fn pod_failed_validation(&self, pod: &str, reason: &str) {
        self.record(Event::PodFailedValidation {
            pod: pod.to_string(),
            reason: reason.to_string(),
        });
    }

    fn provisioner_limit_exceeded(&self, provisioner: &str, reason: &str) {
        self.record(Event::ProvisionerLimitExceeded {
            provisioner: provisioner.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Emits events as structured log lines.
#[derive(Debug, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: Event) {
        match event {
            Event::PodShouldSchedule { pod, node } => {
                info!(%pod, node = node.as_deref().unwrap_or("<none>"), "pod should schedule");
            }
            Event::PodFailedValidation { pod, reason } => {
                debug!(%pod, %reason, "pod failed validation");
            }
            Event::ProvisionerLimitExceeded {
                provisioner,
                reason,
            } => {
                info!(%provisioner, %reason, "provisioner limit exceeded");
            }
        }
    }
}

/// Captures events for assertions.
#[derive(Debug, Default)]
pub struct CapturingRecorder {
    events: Mutex<Vec<Event>>,
}

impl CapturingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("recorder lock poisoned").clone()
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().expect("recorder lock poisoned"))
    }

    pub fn deferred_pods(&self) -> Vec<PodId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::PodShouldSchedule { pod, .. } => Some(pod),
                _ => None,
            })
            .collect()
    }
}

impl EventRecorder for CapturingRecorder {
    fn record(&self, event: Event) {
        self.events.lock().expect("recorder lock poisoned").push(event);
    }
}
