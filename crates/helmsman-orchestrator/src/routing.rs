use helmsman_common::time::now_millis;
use helmsman_common::{
    HealthStatus, LoadMetrics, NodeInfo, OrchestratorError, OrchestratorMessage, Result,
    RoutingAlgorithm, RoutingDecision,
};
use helmsman_metrics::OrchestratorMetricsCollector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock as StdRwLock};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::RoutingConfig;

/// Delivery outcomes remembered per node for adaptive scoring.
const OUTCOME_WINDOW: usize = 100;

/// Weights of latency, capacity and success rate in the adaptive score.
const ADAPTIVE_WEIGHTS: (f64, f64, f64) = (0.4, 0.4, 0.2);

/// What routing knows about one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub node_id: String,
    pub federation_id: String,
    pub region: String,
    pub status: HealthStatus,
    pub load: Option<LoadMetrics>,
}

impl RouteEntry {
    fn from_node(node: &NodeInfo) -> Self {
        Self {
            node_id: node.node_id.clone(),
            federation_id: node.federation_id.clone(),
            region: node.region.clone(),
            status: node.health_status,
            load: node.load_metrics.clone(),
        }
    }

    fn is_candidate(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStats {
    pub total_decisions: u64,
    pub failed_decisions: u64,
    pub federations: usize,
    pub nodes: usize,
    pub decisions_by_algorithm: BTreeMap<String, u64>,
}

/// Candidate list of one destination class.
#[derive(Debug, Default)]
struct RouteClass {
    /// Round-robin order; the front is the next node to try
    rotation: VecDeque<String>,
    /// Smooth weighted round-robin state
    current_weights: HashMap<String, f64>,
}

impl RouteClass {
    /// Next node of the rotation accepted by `allowed`, rotating past it.
    fn next_node(&mut self, allowed: impl Fn(&str) -> bool) -> Option<String> {
        for _ in 0..self.rotation.len() {
            let node = self.rotation.pop_front()?;
            self.rotation.push_back(node.clone());
            if allowed(&node) {
                return Some(node);
            }
        }
        None
    }
}

#[derive(Debug, Default)]
struct RoutingState {
    entries: HashMap<String, RouteEntry>,
    classes: BTreeMap<String, RouteClass>,
    outcomes: HashMap<String, VecDeque<bool>>,
    stats: RoutingStats,
}

impl RoutingState {
    fn candidates(&self, federation_id: &str) -> Vec<&RouteEntry> {
        self.classes
            .get(federation_id)
            .map(|class| {
                class
                    .rotation
                    .iter()
                    .filter_map(|id| self.entries.get(id))
                    .filter(|e| e.is_candidate())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn success_rate(&self, node_id: &str) -> f64 {
        match self.outcomes.get(node_id) {
            Some(window) if !window.is_empty() => {
                window.iter().filter(|ok| **ok).count() as f64 / window.len() as f64
            }
            _ => 1.0,
        }
    }
}

/// Message router over the discovered nodes.
///
/// The routing table maps a destination class (a federation) to its
/// candidate nodes. Unhealthy nodes stay in the table but are never chosen.
pub struct IntelligentRoutingService {
    config: StdRwLock<RoutingConfig>,
    state: RwLock<RoutingState>,
    metrics: OrchestratorMetricsCollector,
}

impl IntelligentRoutingService {
    pub fn new(config: RoutingConfig, metrics: OrchestratorMetricsCollector) -> Self {
        Self {
            config: StdRwLock::new(config),
            state: RwLock::new(RoutingState::default()),
            metrics,
        }
    }

    fn config(&self) -> RoutingConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn update_config(&self, config: RoutingConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Adds a node to its federation's candidates, or refreshes its placement.
    ///
    /// A known node keeps the status and load routing already tracks.
    pub async fn add_node(&self, node: &NodeInfo) {
        let mut state = self.state.write().await;
        let mut entry = RouteEntry::from_node(node);

        if let Some(previous) = state.entries.get(&node.node_id) {
            entry.status = previous.status;
            entry.load = previous.load.clone().or(entry.load);
            // A node that moved federation leaves its old class
            if previous.federation_id != entry.federation_id {
                let old = previous.federation_id.clone();
                remove_from_class(&mut state.classes, &old, &node.node_id);
            }
        }

        let class = state.classes.entry(entry.federation_id.clone()).or_default();
        if !class.rotation.contains(&entry.node_id) {
            class.rotation.push_back(entry.node_id.clone());
        }
        state.entries.insert(entry.node_id.clone(), entry);
    }

    /// Replaces the whole table with `nodes`.
    pub async fn sync_nodes(&self, nodes: &[NodeInfo]) {
        {
            let mut state = self.state.write().await;
            state.entries.clear();
            state.classes.clear();
        }
        for node in nodes {
            self.add_node(node).await;
        }
    }

    pub async fn remove_node(&self, node_id: &str) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.entries.remove(node_id) {
            remove_from_class(&mut state.classes, &entry.federation_id, node_id);
        }
        state.outcomes.remove(node_id);
    }

    pub async fn set_node_health(&self, node_id: &str, status: HealthStatus) {
        if let Some(entry) = self.state.write().await.entries.get_mut(node_id) {
            entry.status = status;
        }
    }

    pub async fn update_node_load(&self, node_id: &str, metrics: LoadMetrics) {
        if let Some(entry) = self.state.write().await.entries.get_mut(node_id) {
            entry.load = Some(metrics);
        }
    }

    /// Records whether a message routed to `node_id` was delivered.
    ///
    /// # Returns
    /// The node's success rate over its outcome window, or `None` if the
    /// node is not in the routing table
    pub async fn record_outcome(&self, node_id: &str, success: bool) -> Option<f64> {
        let mut state = self.state.write().await;
        if !state.entries.contains_key(node_id) {
            return None;
        }
        let window = state.outcomes.entry(node_id.to_string()).or_default();
        if window.len() >= OUTCOME_WINDOW {
            window.pop_front();
        }
        window.push_back(success);
        Some(state.success_rate(node_id))
    }

    /// Picks a target node for `message`.
    ///
    /// # Errors
    /// `ROUTING_FAILED` when the destination class has no candidate that is
    /// not unhealthy.
    pub async fn route_message(&self, message: &OrchestratorMessage) -> Result<RoutingDecision> {
        let start = Instant::now();
        let config = self.config();
        let mut state = self.state.write().await;

        let federation_id = match &message.target_federation_id {
            Some(id) => Some(id.clone()),
            None => state
                .classes
                .keys()
                .find(|id| !state.candidates(id).is_empty())
                .cloned(),
        };

        let candidates: Vec<RouteEntry> = federation_id
            .as_deref()
            .map(|id| state.candidates(id).into_iter().cloned().collect())
            .unwrap_or_default();

        let Some(federation_id) = federation_id.filter(|_| !candidates.is_empty()) else {
            state.stats.failed_decisions += 1;
            self.metrics.record_routing_failure(start);
            let target = message
                .target_federation_id
                .as_deref()
                .unwrap_or("any federation");
            warn!("No healthy route for message {} to {}", message.id, target);
            return Err(OrchestratorError::RoutingFailed(format!(
                "no healthy candidate in {}",
                target
            )));
        };

        let algorithm = effective_algorithm(&config);
        let target = match algorithm {
            RoutingAlgorithm::RoundRobin => round_robin(&mut state, &federation_id, &candidates, |_| true),
            RoutingAlgorithm::LeastConnections => least_connections(&candidates),
            RoutingAlgorithm::WeightedRoundRobin => {
                weighted_round_robin(&mut state, &federation_id, &candidates)
            }
            RoutingAlgorithm::LeastResponseTime => {
                least_response_time(&candidates, config.latency_threshold)
            }
            RoutingAlgorithm::Geographic => {
                let hint = message.region_hint.as_deref().unwrap_or_default();
                let in_region = !hint.is_empty() && candidates.iter().any(|c| c.region == hint);
                round_robin(&mut state, &federation_id, &candidates, |c| {
                    !in_region || c.region == hint
                })
            }
            RoutingAlgorithm::Adaptive => adaptive(&state, &candidates, &config),
        };

        // Every candidate list is non-empty here, so each strategy yields a node
        let target = target.unwrap_or_else(|| candidates[0].node_id.clone());

        state.stats.total_decisions += 1;
        *state
            .stats
            .decisions_by_algorithm
            .entry(algorithm.as_str().to_string())
            .or_insert(0) += 1;

        let cross_federation = message
            .source_node_id
            .as_deref()
            .and_then(|source| state.entries.get(source))
            .is_some_and(|source| source.federation_id != federation_id);
        drop(state);

        self.metrics.record_routing(&target, cross_federation, start);
        debug!(
            "Routed message {} to {} via {}",
            message.id,
            target,
            algorithm.as_str()
        );

        Ok(RoutingDecision {
            message_id: message.id.clone(),
            alternatives: candidates
                .iter()
                .map(|c| c.node_id.clone())
                .filter(|id| *id != target)
                .collect(),
            target_node_id: target,
            federation_id,
            algorithm_used: algorithm,
            decided_at: now_millis(),
        })
    }

    /// Candidate node ids per federation, in rotation order.
    pub async fn get_routing_table(&self) -> BTreeMap<String, Vec<String>> {
        let state = self.state.read().await;
        state
            .classes
            .iter()
            .map(|(federation, class)| {
                let mut nodes: Vec<String> = class.rotation.iter().cloned().collect();
                nodes.sort();
                (federation.clone(), nodes)
            })
            .collect()
    }

    pub async fn get_route_entry(&self, node_id: &str) -> Option<RouteEntry> {
        self.state.read().await.entries.get(node_id).cloned()
    }

    pub async fn get_routing_stats(&self) -> RoutingStats {
        let state = self.state.read().await;
        RoutingStats {
            federations: state.classes.len(),
            nodes: state.entries.len(),
            ..state.stats.clone()
        }
    }
}

fn remove_from_class(classes: &mut BTreeMap<String, RouteClass>, federation_id: &str, node_id: &str) {
    if let Some(class) = classes.get_mut(federation_id) {
        class.rotation.retain(|n| n != node_id);
        class.current_weights.remove(node_id);
        if class.rotation.is_empty() {
            classes.remove(federation_id);
        }
    }
}

/// The algorithm actually applied, honouring the feature switches.
fn effective_algorithm(config: &RoutingConfig) -> RoutingAlgorithm {
    match config.algorithm {
        RoutingAlgorithm::Adaptive if !config.adaptive_routing => RoutingAlgorithm::WeightedRoundRobin,
        RoutingAlgorithm::Geographic if !config.geo_routing_enabled => RoutingAlgorithm::RoundRobin,
        algorithm => algorithm,
    }
}

fn round_robin(
    state: &mut RoutingState,
    federation_id: &str,
    candidates: &[RouteEntry],
    allowed: impl Fn(&RouteEntry) -> bool,
) -> Option<String> {
    let class = state.classes.get_mut(federation_id)?;
    class.next_node(|id| candidates.iter().any(|c| c.node_id == id && allowed(c)))
}

fn least_connections(candidates: &[RouteEntry]) -> Option<String> {
    candidates
        .iter()
        .min_by_key(|c| c.load.as_ref().map(|l| l.active_connections).unwrap_or(0))
        .map(|c| c.node_id.clone())
}

fn least_response_time(candidates: &[RouteEntry], latency_threshold: f64) -> Option<String> {
    candidates
        .iter()
        .min_by(|a, b| {
            let rt = |c: &RouteEntry| c.load.as_ref().map(|l| l.response_time).unwrap_or(latency_threshold);
            rt(a).total_cmp(&rt(b))
        })
        .map(|c| c.node_id.clone())
}

/// Smooth weighted round robin; a node's weight is its idle CPU share.
fn weighted_round_robin(
    state: &mut RoutingState,
    federation_id: &str,
    candidates: &[RouteEntry],
) -> Option<String> {
    let class = state.classes.get_mut(federation_id)?;
    let weight = |c: &RouteEntry| {
        let cpu = c.load.as_ref().map(|l| l.cpu_usage).unwrap_or(0.0);
        (100.0 - cpu).max(1.0)
    };

    let total: f64 = candidates.iter().map(weight).sum();
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let current = class
            .current_weights
            .entry(candidate.node_id.clone())
            .or_insert(0.0);
        *current += weight(candidate);
        if best.map_or(true, |(_, w)| *current > w) {
            best = Some((&candidate.node_id, *current));
        }
    }

    let (chosen, _) = best?;
    if let Some(current) = class.current_weights.get_mut(chosen) {
        *current -= total;
    }
    Some(chosen.to_string())
}

/// Score in `[0, 1]`: lower load and latency and a better delivery record win.
fn adaptive_score(state: &RoutingState, candidate: &RouteEntry, config: &RoutingConfig) -> f64 {
    let headroom = |value: f64, threshold: f64| {
        if threshold <= 0.0 {
            if value <= 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            (1.0 - value / threshold).clamp(0.0, 1.0)
        }
    };

    let (latency, capacity) = match &candidate.load {
        Some(load) => (
            headroom(load.response_time, config.latency_threshold),
            headroom(load.utilization(), config.capacity_threshold),
        ),
        None => (0.5, 0.5),
    };

    let (w_latency, w_capacity, w_success) = ADAPTIVE_WEIGHTS;
    w_latency * latency + w_capacity * capacity + w_success * state.success_rate(&candidate.node_id)
}

fn adaptive(state: &RoutingState, candidates: &[RouteEntry], config: &RoutingConfig) -> Option<String> {
    let mut best: Option<(&RouteEntry, f64)> = None;
    for candidate in candidates {
        let score = adaptive_score(state, candidate, config);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best.map(|(c, _)| c.node_id.clone())
}
