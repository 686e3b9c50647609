//! Events emitted by the orchestrator services.

use helmsman_common::{HealthStatus, LoadMetrics, NodeInfo};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::failover::FailoverEvent;
use crate::scaling::ScalingDecision;

/// Capacity of every event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OrchestratorEvent {
    #[serde(rename_all = "camelCase")]
    Started { orchestrator_id: String },
    Stopped,
    NodeDiscovered { node: NodeInfo },
    #[serde(rename_all = "camelCase")]
    NodeLost { node_id: String, federation_id: String },
    #[serde(rename_all = "camelCase")]
    NodeUnregistered { node_id: String },
    #[serde(rename_all = "camelCase")]
    NodeHealthy { node_id: String, previous: HealthStatus },
    #[serde(rename_all = "camelCase")]
    NodeUnhealthy {
        node_id: String,
        previous: HealthStatus,
        reason: String,
    },
    /// A fresh metrics sample. Consumed internally, never re-emitted.
    #[serde(rename_all = "camelCase")]
    MetricsCollected { node_id: String, metrics: LoadMetrics },
    #[serde(rename_all = "camelCase")]
    NodeFailed { node_id: String, reason: String },
    #[serde(rename_all = "camelCase")]
    NodeRecovered { node_id: String },
    ScalingExecuted { decision: ScalingDecision },
    #[serde(rename_all = "camelCase")]
    FailoverCompleted { group_id: String, event: FailoverEvent },
    ConfigUpdated,
    #[serde(rename_all = "camelCase")]
    TopologyUpdated { last_updated: u64 },
}

impl OrchestratorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::Started { .. } => "started",
            OrchestratorEvent::Stopped => "stopped",
            OrchestratorEvent::NodeDiscovered { .. } => "nodeDiscovered",
            OrchestratorEvent::NodeLost { .. } => "nodeLost",
            OrchestratorEvent::NodeUnregistered { .. } => "nodeUnregistered",
            OrchestratorEvent::NodeHealthy { .. } => "nodeHealthy",
            OrchestratorEvent::NodeUnhealthy { .. } => "nodeUnhealthy",
            OrchestratorEvent::MetricsCollected { .. } => "metricsCollected",
            OrchestratorEvent::NodeFailed { .. } => "nodeFailed",
            OrchestratorEvent::NodeRecovered { .. } => "nodeRecovered",
            OrchestratorEvent::ScalingExecuted { .. } => "scalingExecuted",
            OrchestratorEvent::FailoverCompleted { .. } => "failoverCompleted",
            OrchestratorEvent::ConfigUpdated => "configUpdated",
            OrchestratorEvent::TopologyUpdated { .. } => "topologyUpdated",
        }
    }
}

/// Fire-and-forget sender of [`OrchestratorEvent`]s.
///
/// Emitting never blocks. A receiver that falls more than
/// [`EVENT_CHANNEL_CAPACITY`] events behind observes `Lagged` and skips
/// ahead; the emitter is never slowed down by it.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        trace!("Emitting {}", event.name());
        // No receivers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
