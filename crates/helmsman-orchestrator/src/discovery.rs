//! Node discovery: registry polling, heartbeats and timeout eviction.

use helmsman_common::time::now_millis;
use helmsman_common::{Heartbeat, NodeInfo, NodeTransport, OrchestratorError, Result};
use helmsman_metrics::{OrchestratorMetricsCollector, ServiceKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::events::{EventBus, OrchestratorEvent};
use crate::scheduler::TaskGroup;

/// Node table shared between discovery (which owns membership) and the
/// health monitor (which updates status and load in place).
pub type SharedNodes = Arc<RwLock<HashMap<String, NodeInfo>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryStats {
    pub running: bool,
    pub total_nodes: usize,
    pub nodes_by_federation: BTreeMap<String, usize>,
    pub nodes_by_status: BTreeMap<String, usize>,
    pub registry_url: Option<String>,
}

pub struct NodeDiscoveryService {
    config: StdRwLock<DiscoveryConfig>,
    orchestrator_id: StdRwLock<String>,
    nodes: SharedNodes,
    transport: Arc<dyn NodeTransport>,
    events: EventBus,
    metrics: OrchestratorMetricsCollector,
    heartbeat_sequence: AtomicU64,
    tasks: Mutex<Option<TaskGroup>>,
}

impl NodeDiscoveryService {
    pub fn new(
        config: DiscoveryConfig,
        orchestrator_id: String,
        transport: Arc<dyn NodeTransport>,
        events: EventBus,
        metrics: OrchestratorMetricsCollector,
    ) -> Self {
        Self {
            config: StdRwLock::new(config),
            orchestrator_id: StdRwLock::new(orchestrator_id),
            nodes: Arc::new(RwLock::new(HashMap::new())),
            transport,
            events,
            metrics,
            heartbeat_sequence: AtomicU64::new(0),
            tasks: Mutex::new(None),
        }
    }

    fn config(&self) -> DiscoveryConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn orchestrator_id(&self) -> String {
        self.orchestrator_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn shared_nodes(&self) -> SharedNodes {
        self.nodes.clone()
    }

    /// Runs a first discovery cycle and starts the poll and heartbeat timers.
    ///
    /// An unreachable registry is not an error here; the next poll retries.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return Ok(());
        }

        let config = self.config();
        let mut group = TaskGroup::new();

        if config.enabled {
            if config.service_registry_url.is_some() {
                self.run_discovery_cycle().await;

                let weak = Arc::downgrade(self);
                group.spawn("discovery-poll", config.discovery_period(), move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(this) = weak.upgrade() {
                            this.run_discovery_cycle().await;
                        }
                    }
                });
            } else {
                info!("No service registry configured, nodes must be registered manually");
            }

            let weak = Arc::downgrade(self);
            group.spawn("heartbeat-sweep", config.heartbeat_period(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.heartbeat_sweep().await;
                    }
                }
            });
            info!(
                "Node discovery started (poll every {}ms, heartbeat every {}ms)",
                config.discovery_interval, config.heartbeat_interval
            );
        } else {
            info!("Node discovery disabled");
        }

        *tasks = Some(group);
        Ok(())
    }

    pub async fn stop(&self) {
        let group = self.tasks.lock().await.take();
        if let Some(group) = group {
            group.stop().await;
            info!("Node discovery stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    /// Applies a new discovery configuration, restarting timers if needed.
    pub async fn update_config(self: &Arc<Self>, config: DiscoveryConfig, orchestrator_id: &str) -> Result<()> {
        *self
            .orchestrator_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = orchestrator_id.to_string();

        let previous = std::mem::replace(
            &mut *self.config.write().unwrap_or_else(PoisonError::into_inner),
            config.clone(),
        );

        let timers_changed = previous.enabled != config.enabled
            || previous.discovery_interval != config.discovery_interval
            || previous.heartbeat_interval != config.heartbeat_interval
            || previous.service_registry_url != config.service_registry_url;

        if timers_changed && self.is_running().await {
            debug!("Discovery timers changed, restarting");
            self.stop().await;
            self.start().await?;
        }
        Ok(())
    }

    async fn run_discovery_cycle(&self) {
        match self.discover_nodes().await {
            Ok(count) => {
                debug!("Discovery cycle saw {} nodes", count);
                self.metrics.record_service_success(ServiceKind::Discovery);
            }
            Err(e) => {
                warn!("Node discovery failed: {}", e);
                self.metrics
                    .record_service_failure(ServiceKind::Discovery, &e.to_string());
            }
        }
    }

    /// Polls the registry and upserts every returned node.
    ///
    /// The registry is tried up to `maxRetries` times.
    ///
    /// # Returns
    /// The number of nodes the registry returned
    pub async fn discover_nodes(&self) -> Result<usize> {
        let config = self.config();
        let Some(url) = config.service_registry_url.clone() else {
            return Ok(0);
        };

        let attempts = config.max_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self
                .transport
                .fetch_registry(&url, config.request_timeout())
                .await
            {
                Ok(nodes) => {
                    let count = nodes.len();
                    for node in nodes {
                        if node.node_id.is_empty() {
                            warn!("Registry returned a node without an id, skipping");
                            continue;
                        }
                        self.upsert_node(node).await;
                    }
                    return Ok(count);
                }
                Err(e) => {
                    debug!(
                        "Registry poll attempt {}/{} failed: {}",
                        attempt, attempts, e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                    }
                }
            }
        }

        Err(OrchestratorError::DiscoveryFailed(format!(
            "registry {} unreachable after {} attempts: {}",
            url,
            attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Inserts a node or merges it into the known one, refreshing its timestamp.
    ///
    /// # Returns
    /// `true` if the node was new
    async fn upsert_node(&self, node: NodeInfo) -> bool {
        let now = now_millis();
        let inserted = {
            let mut nodes = self.nodes.write().await;
            match nodes.get_mut(&node.node_id) {
                Some(existing) => {
                    existing.merge_from(&node);
                    existing.last_health_check = existing.last_health_check.max(now);
                    None
                }
                None => {
                    let mut node = node;
                    node.last_health_check = now;
                    nodes.insert(node.node_id.clone(), node.clone());
                    Some(node)
                }
            }
        };

        match inserted {
            Some(node) => {
                info!(
                    "Discovered node {} in federation {} at {}",
                    node.node_id,
                    node.federation_id,
                    node.base_url()
                );
                self.events.emit(OrchestratorEvent::NodeDiscovered { node });
                true
            }
            None => false,
        }
    }

    /// Evicts timed-out nodes and heartbeats the rest.
    pub async fn heartbeat_sweep(&self) {
        let config = self.config();
        self.evict_timed_out_nodes(config.node_timeout).await;

        let nodes: Vec<NodeInfo> = self.nodes.read().await.values().cloned().collect();
        if nodes.is_empty() {
            return;
        }

        let orchestrator_id = self.orchestrator_id();
        let timeout = config.request_timeout();
        let heartbeats = nodes.into_iter().map(|node| {
            let heartbeat = Heartbeat {
                orchestrator_id: orchestrator_id.clone(),
                timestamp: now_millis(),
                sequence: self.heartbeat_sequence.fetch_add(1, Ordering::SeqCst) + 1,
            };
            async move {
                let result = self
                    .transport
                    .send_heartbeat(&node, &heartbeat, timeout)
                    .await;
                (node.node_id, heartbeat.timestamp, result)
            }
        });

        let results = futures::future::join_all(heartbeats).await;

        let mut nodes = self.nodes.write().await;
        for (node_id, issued_at, result) in results {
            match result {
                Ok(()) => {
                    if let Some(node) = nodes.get_mut(&node_id) {
                        node.last_health_check = node.last_health_check.max(issued_at);
                    }
                }
                Err(e) => debug!("Heartbeat to {} failed: {}", node_id, e),
            }
        }
    }

    /// Removes every node not refreshed within `node_timeout` ms.
    ///
    /// # Returns
    /// The evicted nodes
    pub async fn evict_timed_out_nodes(&self, node_timeout: u64) -> Vec<NodeInfo> {
        let now = now_millis();
        let expired = |node: &NodeInfo| now.saturating_sub(node.last_health_check) > node_timeout;

        let candidates: Vec<String> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| expired(n))
            .map(|n| n.node_id.clone())
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        // Re-checked under the write lock so a concurrent refresh wins
        let mut evicted = Vec::new();
        {
            let mut nodes = self.nodes.write().await;
            for id in &candidates {
                if nodes.get(id).is_some_and(|n| expired(n)) {
                    evicted.extend(nodes.remove(id));
                }
            }
        }

        for node in &evicted {
            warn!(
                "Node {} timed out (last seen {}ms ago), evicting",
                node.node_id,
                now.saturating_sub(node.last_health_check)
            );
            self.events.emit(OrchestratorEvent::NodeLost {
                node_id: node.node_id.clone(),
                federation_id: node.federation_id.clone(),
            });
        }
        evicted
    }

    /// Registers a node directly, bypassing the registry.
    pub async fn register_node(&self, node: NodeInfo) -> Result<NodeInfo> {
        if node.node_id.trim().is_empty() {
            return Err(OrchestratorError::DiscoveryFailed(
                "node id must not be empty".to_string(),
            ));
        }
        if node.federation_id.trim().is_empty() {
            return Err(OrchestratorError::DiscoveryFailed(format!(
                "node {} has no federation id",
                node.node_id
            )));
        }

        let node_id = node.node_id.clone();
        self.upsert_node(node).await;
        self.get_node_by_id(&node_id).await.ok_or_else(|| {
            OrchestratorError::DiscoveryFailed(format!("node {} vanished during registration", node_id))
        })
    }

    /// Removes a node. Returns `None` if it was not known.
    pub async fn unregister_node(&self, node_id: &str) -> Option<NodeInfo> {
        let removed = self.nodes.write().await.remove(node_id);
        if let Some(node) = &removed {
            info!("Unregistered node {}", node.node_id);
            self.events.emit(OrchestratorEvent::NodeUnregistered {
                node_id: node.node_id.clone(),
            });
        }
        removed
    }

    /// All known nodes, ordered by id.
    pub async fn get_discovered_nodes(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub async fn get_nodes_by_federation(&self, federation_id: &str) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.federation_id == federation_id)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub async fn get_node_by_id(&self, node_id: &str) -> Option<NodeInfo> {
        self.nodes.read().await.get(node_id).cloned()
    }

    pub async fn get_discovery_stats(&self) -> DiscoveryStats {
        let nodes = self.nodes.read().await;
        let mut nodes_by_federation = BTreeMap::new();
        let mut nodes_by_status = BTreeMap::new();
        for node in nodes.values() {
            *nodes_by_federation
                .entry(node.federation_id.clone())
                .or_insert(0) += 1;
            *nodes_by_status
                .entry(node.health_status.as_str().to_string())
                .or_insert(0) += 1;
        }

        DiscoveryStats {
            running: self.tasks.lock().await.is_some(),
            total_nodes: nodes.len(),
            nodes_by_federation,
            nodes_by_status,
            registry_url: self.config().service_registry_url,
        }
    }
}
