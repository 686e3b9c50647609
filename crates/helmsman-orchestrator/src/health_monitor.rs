use helmsman_common::time::now_millis;
use helmsman_common::{HealthStatus, LoadMetrics, NodeInfo, NodeTransport, Result};
use helmsman_metrics::{OrchestratorMetricsCollector, ServiceKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::HealthMonitoringConfig;
use crate::discovery::SharedNodes;
use crate::events::{EventBus, OrchestratorEvent};
use crate::node::{HysteresisConfig, NodeHealthState, ProbeOutcome, Transition};
use crate::scheduler::TaskGroup;

/// Node counts by resolved status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub overall: HealthStatus,
}

impl HealthSummary {
    fn from_statuses(statuses: impl IntoIterator<Item = HealthStatus>) -> Self {
        let mut summary = HealthSummary {
            total: 0,
            healthy: 0,
            degraded: 0,
            unhealthy: 0,
            unknown: 0,
            overall: HealthStatus::Healthy,
        };
        for status in statuses {
            summary.total += 1;
            match status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Degraded => summary.degraded += 1,
                HealthStatus::Unhealthy => summary.unhealthy += 1,
                HealthStatus::Unknown => summary.unknown += 1,
            }
        }
        summary.overall = if summary.unhealthy == 0 && summary.degraded == 0 {
            HealthStatus::Healthy
        } else if summary.unhealthy == 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        summary
    }
}

/// Health monitor for discovered nodes.
///
/// Probes run in parallel within a sweep. Each node's resolved status only
/// changes once a streak of consistent probe outcomes reaches its
/// threshold; events are emitted on resolved changes only.
pub struct HealthMonitoringService {
    config: StdRwLock<HealthMonitoringConfig>,
    nodes: SharedNodes,
    states: RwLock<HashMap<String, NodeHealthState>>,
    transport: Arc<dyn NodeTransport>,
    events: EventBus,
    metrics: OrchestratorMetricsCollector,
    tasks: Mutex<Option<TaskGroup>>,
}

impl HealthMonitoringService {
    /// Creates a new health monitor.
    ///
    /// # Arguments
    /// * `config` - Health monitoring configuration
    /// * `nodes` - The node table to check, shared with discovery
    /// * `transport` - Used for health and metrics probes
    pub fn new(
        config: HealthMonitoringConfig,
        nodes: SharedNodes,
        transport: Arc<dyn NodeTransport>,
        events: EventBus,
        metrics: OrchestratorMetricsCollector,
    ) -> Self {
        Self {
            config: StdRwLock::new(config),
            nodes,
            states: RwLock::new(HashMap::new()),
            transport,
            events,
            metrics,
            tasks: Mutex::new(None),
        }
    }

    fn config(&self) -> HealthMonitoringConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn hysteresis(config: &HealthMonitoringConfig) -> HysteresisConfig {
        HysteresisConfig {
            healthy_threshold: config.healthy_threshold,
            unhealthy_threshold: config.unhealthy_threshold,
        }
    }

    /// Starts the health check and metrics collection timers.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return Ok(());
        }

        let config = self.config();
        let mut group = TaskGroup::new();
        if config.enabled {
            let weak = Arc::downgrade(self);
            group.spawn("health-sweep", config.check_period(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.check_all_nodes().await;
                    }
                }
            });

            let weak = Arc::downgrade(self);
            group.spawn("metrics-sweep", config.metrics_period(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.collect_all_metrics().await;
                    }
                }
            });
            info!(
                "Health monitoring started (checks every {}ms, metrics every {}ms)",
                config.check_interval, config.metrics_collection_interval
            );
        } else {
            info!("Health monitoring disabled");
        }

        *tasks = Some(group);
        Ok(())
    }

    pub async fn stop(&self) {
        let group = self.tasks.lock().await.take();
        if let Some(group) = group {
            group.stop().await;
            info!("Health monitoring stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    pub async fn update_config(self: &Arc<Self>, config: HealthMonitoringConfig) -> Result<()> {
        let previous = std::mem::replace(
            &mut *self.config.write().unwrap_or_else(PoisonError::into_inner),
            config.clone(),
        );

        if previous.metrics_history_size != config.metrics_history_size {
            for state in self.states.write().await.values_mut() {
                state.set_metrics_capacity(config.metrics_history_size);
            }
        }

        let timers_changed = previous.enabled != config.enabled
            || previous.check_interval != config.check_interval
            || previous.metrics_collection_interval != config.metrics_collection_interval;
        if timers_changed && self.is_running().await {
            debug!("Health monitoring timers changed, restarting");
            self.stop().await;
            self.start().await?;
        }
        Ok(())
    }

    /// Probes every known node once, in parallel.
    pub async fn check_all_nodes(&self) {
        let nodes: Vec<NodeInfo> = self.nodes.read().await.values().cloned().collect();
        let checks = nodes.iter().map(|node| self.check_node_health(node));
        futures::future::join_all(checks).await;
        self.metrics.record_service_success(ServiceKind::HealthMonitor);
    }

    /// Probes one node and applies the outcome.
    ///
    /// A timeout counts as a failed probe.
    ///
    /// # Returns
    /// The node's resolved status after this probe
    pub async fn check_node_health(&self, node: &NodeInfo) -> HealthStatus {
        let config = self.config();
        let issued_at = now_millis();

        let outcome = match self
            .transport
            .probe_health(node, config.probe_timeout())
            .await
        {
            Ok(payload) if payload.is_healthy() => ProbeOutcome::Healthy,
            Ok(payload) => ProbeOutcome::Unhealthy(format!("node reported status {}", payload.status)),
            Err(e) => ProbeOutcome::Unhealthy(e.to_string()),
        };
        if let ProbeOutcome::Unhealthy(reason) = &outcome {
            debug!("Health probe of {} failed: {}", node.node_id, reason);
        }

        self.apply_probe(&node.node_id, issued_at, outcome).await
    }

    async fn apply_probe(&self, node_id: &str, issued_at: u64, outcome: ProbeOutcome) -> HealthStatus {
        let config = self.config();
        let healthy = outcome.is_healthy();
        let reason = match &outcome {
            ProbeOutcome::Unhealthy(reason) => reason.clone(),
            ProbeOutcome::Healthy => String::new(),
        };

        let (status, transition) = {
            let mut states = self.states.write().await;
            // The node may have left the fleet while the probe was in flight
            if !self.nodes.read().await.contains_key(node_id) {
                debug!("Dropping probe result for departed node {}", node_id);
                states.remove(node_id);
                return HealthStatus::Unknown;
            }
            let state = states
                .entry(node_id.to_string())
                .or_insert_with(|| NodeHealthState::new(node_id.to_string(), config.metrics_history_size));

            // A probe issued before the last applied one is stale
            if issued_at < state.last_probe_issued_at {
                debug!("Dropping stale probe result for {}", node_id);
                return state.status;
            }
            state.last_probe_issued_at = issued_at;

            let transition = state.record_probe(outcome, &Self::hysteresis(&config));
            (state.status, transition)
        };

        {
            let mut nodes = self.nodes.write().await;
            if let Some(node) = nodes.get_mut(node_id) {
                node.health_status = status;
                if healthy {
                    node.last_health_check = node.last_health_check.max(issued_at);
                }
            }
        }

        if let Some(transition) = transition {
            self.emit_transition(node_id, transition, reason);
        }
        status
    }

    fn emit_transition(&self, node_id: &str, transition: Transition, reason: String) {
        match transition.to {
            HealthStatus::Healthy => {
                info!(
                    "Node {} is healthy (was {})",
                    node_id, transition.from
                );
                self.events.emit(OrchestratorEvent::NodeHealthy {
                    node_id: node_id.to_string(),
                    previous: transition.from,
                });
            }
            HealthStatus::Unhealthy => {
                warn!(
                    "Node {} is unhealthy (was {}): {}",
                    node_id, transition.from, reason
                );
                self.events.emit(OrchestratorEvent::NodeUnhealthy {
                    node_id: node_id.to_string(),
                    previous: transition.from,
                    reason,
                });
            }
            HealthStatus::Degraded | HealthStatus::Unknown => {}
        }
    }

    /// Collects a metrics sample from every known node, in parallel.
    pub async fn collect_all_metrics(&self) {
        let nodes: Vec<NodeInfo> = self.nodes.read().await.values().cloned().collect();
        let collections = nodes.iter().map(|node| self.collect_node_metrics(node));
        futures::future::join_all(collections).await;
    }

    /// Fetches, timestamps and stores one metrics sample.
    ///
    /// A failed fetch is logged and yields no sample.
    pub async fn collect_node_metrics(&self, node: &NodeInfo) -> Option<LoadMetrics> {
        let config = self.config();
        let mut sample = match self
            .transport
            .fetch_metrics(node, config.probe_timeout())
            .await
        {
            Ok(sample) => sample,
            Err(e) => {
                debug!("Metrics collection from {} failed: {}", node.node_id, e);
                return None;
            }
        };
        sample.timestamp = now_millis();

        {
            let mut states = self.states.write().await;
            let mut nodes = self.nodes.write().await;
            let Some(known) = nodes.get_mut(&node.node_id) else {
                debug!("Dropping metrics sample of departed node {}", node.node_id);
                states.remove(&node.node_id);
                return None;
            };
            known.load_metrics = Some(sample.clone());
            states
                .entry(node.node_id.clone())
                .or_insert_with(|| NodeHealthState::new(node.node_id.clone(), config.metrics_history_size))
                .push_metrics(sample.clone());
        }

        self.events.emit(OrchestratorEvent::MetricsCollected {
            node_id: node.node_id.clone(),
            metrics: sample.clone(),
        });
        Some(sample)
    }

    /// Forces the resolved status of a node, resetting its probe streaks.
    ///
    /// Used for explicit failure and recovery reports. No event is emitted;
    /// the caller reports the change.
    ///
    /// # Returns
    /// The transition, if the resolved status changed
    pub async fn update_node_health(&self, node_id: &str, status: HealthStatus) -> Option<Transition> {
        let capacity = self.config().metrics_history_size;
        let transition = self
            .states
            .write()
            .await
            .entry(node_id.to_string())
            .or_insert_with(|| NodeHealthState::new(node_id.to_string(), capacity))
            .force_status(status);

        if let Some(node) = self.nodes.write().await.get_mut(node_id) {
            node.health_status = status;
        }
        transition
    }

    /// Drops all health state of a node that left the fleet.
    pub async fn forget_node(&self, node_id: &str) {
        self.states.write().await.remove(node_id);
    }

    pub async fn get_node_health_status(&self, node_id: &str) -> Option<HealthStatus> {
        if let Some(state) = self.states.read().await.get(node_id) {
            return Some(state.status);
        }
        self.nodes
            .read()
            .await
            .get(node_id)
            .map(|_| HealthStatus::Unknown)
    }

    /// Resolved status of every known node, unprobed ones as `Unknown`.
    pub async fn get_all_node_health_statuses(&self) -> BTreeMap<String, HealthStatus> {
        let states = self.states.read().await;
        self.nodes
            .read()
            .await
            .keys()
            .map(|id| {
                let status = states.get(id).map(|s| s.status).unwrap_or_default();
                (id.clone(), status)
            })
            .collect()
    }

    /// Up to `limit` most recent samples of a node, oldest first.
    pub async fn get_node_metrics(&self, node_id: &str, limit: usize) -> Vec<LoadMetrics> {
        self.states
            .read()
            .await
            .get(node_id)
            .map(|s| s.recent_metrics(limit))
            .unwrap_or_default()
    }

    /// Latest sample of every node that has one.
    pub async fn get_latest_metrics(&self) -> BTreeMap<String, LoadMetrics> {
        self.states
            .read()
            .await
            .iter()
            .filter_map(|(id, s)| s.latest_metrics().map(|m| (id.clone(), m.clone())))
            .collect()
    }

    pub async fn get_healthy_nodes(&self) -> Vec<String> {
        self.nodes_with_status(HealthStatus::Healthy).await
    }

    pub async fn get_unhealthy_nodes(&self) -> Vec<String> {
        self.nodes_with_status(HealthStatus::Unhealthy).await
    }

    async fn nodes_with_status(&self, wanted: HealthStatus) -> Vec<String> {
        self.get_all_node_health_statuses()
            .await
            .into_iter()
            .filter(|(_, status)| *status == wanted)
            .map(|(id, _)| id)
            .collect()
    }

    pub async fn get_health_summary(&self) -> HealthSummary {
        HealthSummary::from_statuses(self.get_all_node_health_statuses().await.into_values())
    }

    /// Mean of each load field over the latest sample of the given nodes,
    /// or of all nodes when `node_ids` is `None`.
    ///
    /// # Returns
    /// `None` if none of the nodes has a sample
    pub async fn calculate_average_load(&self, node_ids: Option<&[String]>) -> Option<LoadMetrics> {
        let states = self.states.read().await;
        let samples: Vec<&LoadMetrics> = match node_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| states.get(id).and_then(|s| s.latest_metrics()))
                .collect(),
            None => states.values().filter_map(|s| s.latest_metrics()).collect(),
        };
        average_load(&samples)
    }
}

/// Arithmetic mean of each field; the timestamp is the newest one.
pub fn average_load(samples: &[&LoadMetrics]) -> Option<LoadMetrics> {
    if samples.is_empty() {
        return None;
    }

    let n = samples.len() as f64;
    let mean = |field: fn(&LoadMetrics) -> f64| samples.iter().map(|m| field(m)).sum::<f64>() / n;

    Some(LoadMetrics {
        cpu_usage: mean(|m| m.cpu_usage),
        memory_usage: mean(|m| m.memory_usage),
        active_connections: mean(|m| m.active_connections as f64).round() as u64,
        request_rate: mean(|m| m.request_rate),
        error_rate: mean(|m| m.error_rate),
        response_time: mean(|m| m.response_time),
        timestamp: samples.iter().map(|m| m.timestamp).max().unwrap_or_default(),
    })
}
