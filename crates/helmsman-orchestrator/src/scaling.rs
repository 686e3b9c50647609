use async_trait::async_trait;
use helmsman_common::time::now_millis;
use helmsman_common::{ErrorCode, LoadMetrics, OrchestratorError, Result};
use helmsman_metrics::{OrchestratorMetricsCollector, ServiceKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ScalingConfig;
use crate::discovery::SharedNodes;
use crate::events::{EventBus, OrchestratorEvent};
use crate::health_monitor::HealthMonitoringService;
use crate::scheduler::TaskGroup;

/// Decisions kept for history queries.
const HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    NoAction,
}

impl ScalingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingAction::ScaleUp => "SCALE_UP",
            ScalingAction::ScaleDown => "SCALE_DOWN",
            ScalingAction::NoAction => "NO_ACTION",
        }
    }
}

impl fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingDecision {
    pub action: ScalingAction,
    pub target_nodes: Vec<String>,
    pub reason: String,
    /// Expected change of the average utilisation, in percentage points
    pub expected_impact: f64,
    pub timestamp: u64,
}

impl ScalingDecision {
    pub fn no_action(reason: impl Into<String>) -> Self {
        Self {
            action: ScalingAction::NoAction,
            target_nodes: Vec::new(),
            reason: reason.into(),
            expected_impact: 0.0,
            timestamp: now_millis(),
        }
    }
}

/// Load data of one node handed to an evaluator.
#[derive(Debug, Clone)]
pub struct NodeLoad {
    pub node_id: String,
    pub latest: LoadMetrics,
    /// Samples inside the metrics window, oldest first
    pub history: Vec<LoadMetrics>,
}

#[derive(Debug, Clone)]
pub struct ScalingInput {
    pub config: ScalingConfig,
    /// Nodes currently known, sampled or not
    pub node_count: usize,
    pub loads: Vec<NodeLoad>,
    pub now: u64,
}

/// Turns the current fleet load into a scaling decision.
///
/// Any `Fn(&ScalingInput) -> ScalingDecision` closure is an evaluator.
pub trait ScalingEvaluator: Send + Sync {
    fn evaluate(&self, input: &ScalingInput) -> ScalingDecision;
}

impl<F> ScalingEvaluator for F
where
    F: Fn(&ScalingInput) -> ScalingDecision + Send + Sync,
{
    fn evaluate(&self, input: &ScalingInput) -> ScalingDecision {
        self(input)
    }
}

/// Compares the average utilisation against the configured thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdEvaluator;

impl ThresholdEvaluator {
    /// Utilisation used for the decision, projected forward when
    /// predictive scaling is on.
    fn utilization(load: &NodeLoad, input: &ScalingInput) -> f64 {
        let current = load.latest.utilization();
        if !input.config.predictive_scaling {
            return current;
        }
        match trend_per_ms(&load.history) {
            Some(slope) => {
                let horizon = input.config.evaluation_interval as f64;
                (current + slope * horizon).clamp(0.0, 100.0)
            }
            None => current,
        }
    }
}

impl ScalingEvaluator for ThresholdEvaluator {
    fn evaluate(&self, input: &ScalingInput) -> ScalingDecision {
        if input.loads.is_empty() {
            return ScalingDecision::no_action("no load samples");
        }

        let mut utilizations: Vec<(&str, f64)> = input
            .loads
            .iter()
            .map(|load| (load.node_id.as_str(), Self::utilization(load, input)))
            .collect();
        let average = utilizations.iter().map(|(_, u)| u).sum::<f64>() / utilizations.len() as f64;
        let config = &input.config;
        let n = input.node_count.max(1) as f64;

        if average > config.scale_up_threshold && input.node_count < config.max_nodes {
            utilizations.sort_by(|a, b| b.1.total_cmp(&a.1));
            let targets = utilizations
                .iter()
                .filter(|(_, u)| *u > config.scale_up_threshold)
                .map(|(id, _)| id.to_string())
                .collect();
            return ScalingDecision {
                action: ScalingAction::ScaleUp,
                target_nodes: targets,
                reason: format!(
                    "average utilisation {:.1}% above {:.1}%",
                    average, config.scale_up_threshold
                ),
                expected_impact: average * n / (n + 1.0) - average,
                timestamp: input.now,
            };
        }

        if average < config.scale_down_threshold && input.node_count > config.min_nodes {
            utilizations.sort_by(|a, b| a.1.total_cmp(&b.1));
            let (coolest, _) = utilizations[0];
            return ScalingDecision {
                action: ScalingAction::ScaleDown,
                target_nodes: vec![coolest.to_string()],
                reason: format!(
                    "average utilisation {:.1}% below {:.1}%",
                    average, config.scale_down_threshold
                ),
                expected_impact: average * n / (n - 1.0).max(1.0) - average,
                timestamp: input.now,
            };
        }

        ScalingDecision {
            timestamp: input.now,
            ..ScalingDecision::no_action(format!("average utilisation {:.1}% within thresholds", average))
        }
    }
}

/// Least-squares slope of utilisation over time, per millisecond.
fn trend_per_ms(history: &[LoadMetrics]) -> Option<f64> {
    if history.len() < 2 {
        return None;
    }
    let n = history.len() as f64;
    let t0 = history[0].timestamp as f64;
    let xs: Vec<f64> = history.iter().map(|m| m.timestamp as f64 - t0).collect();
    let ys: Vec<f64> = history.iter().map(LoadMetrics::utilization).collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let covariance: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let variance: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    (variance > 0.0).then(|| covariance / variance)
}

/// Performs scaling actions against the infrastructure.
#[async_trait]
pub trait ScalingExecutor: Send + Sync {
    async fn scale_up(&self, node_ids: &[String]) -> Result<()>;
    async fn scale_down(&self, node_ids: &[String]) -> Result<()>;
}

/// Executor that only logs the actions it is asked to perform.
#[derive(Debug, Default)]
pub struct LoggingScalingExecutor;

#[async_trait]
impl ScalingExecutor for LoggingScalingExecutor {
    async fn scale_up(&self, node_ids: &[String]) -> Result<()> {
        info!("Scale up requested for {:?}", node_ids);
        Ok(())
    }

    async fn scale_down(&self, node_ids: &[String]) -> Result<()> {
        info!("Scale down requested for {:?}", node_ids);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingStats {
    pub enabled: bool,
    pub total_decisions: u64,
    pub scale_ups: u64,
    pub scale_downs: u64,
    pub failures: u64,
    pub skipped_cooldown: u64,
    pub average_impact: f64,
    pub nodes_in_cooldown: usize,
    pub last_decision: Option<ScalingDecision>,
}

#[derive(Debug, Default)]
struct Counters {
    scale_ups: u64,
    scale_downs: u64,
    failures: u64,
    skipped_cooldown: u64,
    total_impact: f64,
}

/// Evaluates fleet load on a timer and executes scaling decisions.
///
/// Each target is subject to a cooldown: after an executed decision naming
/// a node first, further decisions for that node are skipped until
/// `cooldownPeriod` has passed.
pub struct AutoScalingService {
    config: StdRwLock<ScalingConfig>,
    nodes: SharedNodes,
    health: Arc<HealthMonitoringService>,
    evaluator: Arc<dyn ScalingEvaluator>,
    executor: Arc<dyn ScalingExecutor>,
    events: EventBus,
    metrics: OrchestratorMetricsCollector,
    last_action: StdMutex<HashMap<String, u64>>,
    history: StdMutex<VecDeque<ScalingDecision>>,
    counters: StdMutex<Counters>,
    tasks: Mutex<Option<TaskGroup>>,
}

impl AutoScalingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ScalingConfig,
        nodes: SharedNodes,
        health: Arc<HealthMonitoringService>,
        evaluator: Arc<dyn ScalingEvaluator>,
        executor: Arc<dyn ScalingExecutor>,
        events: EventBus,
        metrics: OrchestratorMetricsCollector,
    ) -> Self {
        Self {
            config: StdRwLock::new(config),
            nodes,
            health,
            evaluator,
            executor,
            events,
            metrics,
            last_action: StdMutex::new(HashMap::new()),
            history: StdMutex::new(VecDeque::new()),
            counters: StdMutex::new(Counters::default()),
            tasks: Mutex::new(None),
        }
    }

    fn config(&self) -> ScalingConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return Ok(());
        }

        let config = self.config();
        let mut group = TaskGroup::new();
        if config.enabled {
            let weak = Arc::downgrade(self);
            group.spawn("scaling-evaluation", config.evaluation_period(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        // Failures are logged and recorded by evaluate_and_scale
                        let _ = this.evaluate_and_scale().await;
                    }
                }
            });
            info!("Auto-scaling started (every {}ms)", config.evaluation_interval);
        } else {
            info!("Auto-scaling disabled");
        }

        *tasks = Some(group);
        Ok(())
    }

    pub async fn stop(&self) {
        let group = self.tasks.lock().await.take();
        if let Some(group) = group {
            group.stop().await;
            info!("Auto-scaling stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    pub async fn update_config(self: &Arc<Self>, config: ScalingConfig) -> Result<()> {
        let previous = std::mem::replace(
            &mut *self.config.write().unwrap_or_else(PoisonError::into_inner),
            config.clone(),
        );
        let timers_changed =
            previous.enabled != config.enabled || previous.evaluation_interval != config.evaluation_interval;
        if timers_changed && self.is_running().await {
            debug!("Scaling timer changed, restarting");
            self.stop().await;
            self.start().await?;
        }
        Ok(())
    }

    /// Changes only the two utilisation thresholds.
    pub fn update_scaling_thresholds(&self, scale_up: f64, scale_down: f64) -> Result<()> {
        if !(0.0..=100.0).contains(&scale_up) || !(0.0..=100.0).contains(&scale_down) {
            return Err(OrchestratorError::Configuration(
                "scaling thresholds must be within [0, 100]".to_string(),
            ));
        }
        if scale_down >= scale_up {
            return Err(OrchestratorError::Configuration(
                "scaleDownThreshold must be below scaleUpThreshold".to_string(),
            ));
        }
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        config.scale_up_threshold = scale_up;
        config.scale_down_threshold = scale_down;
        info!("Scaling thresholds set to up {} / down {}", scale_up, scale_down);
        Ok(())
    }

    /// Gathers the current load of the fleet.
    async fn scaling_input(&self, config: ScalingConfig) -> ScalingInput {
        let now = now_millis();
        let window_start = now.saturating_sub(config.metrics_window * 1000);
        let node_count = self.nodes.read().await.len();

        let mut loads = Vec::new();
        for (node_id, latest) in self.health.get_latest_metrics().await {
            let history = if config.predictive_scaling {
                self.health
                    .get_node_metrics(&node_id, usize::MAX)
                    .await
                    .into_iter()
                    .filter(|m| m.timestamp >= window_start)
                    .collect()
            } else {
                Vec::new()
            };
            loads.push(NodeLoad {
                node_id,
                latest,
                history,
            });
        }

        ScalingInput {
            config,
            node_count,
            loads,
            now,
        }
    }

    /// One evaluation tick: evaluate the fleet and execute the decision.
    ///
    /// # Returns
    /// The executed decision, or `None` for no action or a skipped one
    pub async fn evaluate_and_scale(&self) -> Result<Option<ScalingDecision>> {
        let config = self.config();
        if !config.enabled {
            return Ok(None);
        }

        let input = self.scaling_input(config).await;
        let decision = self.evaluator.evaluate(&input);
        debug!("Scaling evaluation: {} ({})", decision.action, decision.reason);

        let result = self.execute_decision(decision).await;
        match &result {
            Ok(_) => self.metrics.record_service_success(ServiceKind::AutoScaling),
            Err(e) => self
                .metrics
                .record_service_failure(ServiceKind::AutoScaling, &e.to_string()),
        }
        result
    }

    /// Executes an operator-requested scaling action.
    ///
    /// Cooldown and history apply as for evaluated decisions.
    pub async fn manual_scale(
        &self,
        action: ScalingAction,
        target_nodes: Vec<String>,
        reason: &str,
    ) -> Result<Option<ScalingDecision>> {
        if action != ScalingAction::NoAction && target_nodes.is_empty() {
            return Err(OrchestratorError::ScalingFailed(
                "manual scaling needs at least one target node".to_string(),
            ));
        }
        let decision = ScalingDecision {
            action,
            target_nodes,
            reason: format!("manual: {}", reason),
            expected_impact: 0.0,
            timestamp: now_millis(),
        };
        self.execute_decision(decision).await
    }

    async fn execute_decision(&self, decision: ScalingDecision) -> Result<Option<ScalingDecision>> {
        if decision.action == ScalingAction::NoAction {
            return Ok(None);
        }
        let Some(key) = decision.target_nodes.first().cloned() else {
            warn!("Ignoring {} decision without targets", decision.action);
            return Ok(None);
        };

        let cooldown_ms = self.config().cooldown().as_millis() as u64;
        let Some(previous) = self.reserve_cooldown(&key, decision.timestamp, cooldown_ms) else {
            info!("Skipping {} for {}: within cooldown", decision.action, key);
            self.counters().skipped_cooldown += 1;
            return Ok(None);
        };

        let outcome = match decision.action {
            ScalingAction::ScaleUp => self.executor.scale_up(&decision.target_nodes).await,
            ScalingAction::ScaleDown => self.executor.scale_down(&decision.target_nodes).await,
            ScalingAction::NoAction => Ok(()),
        };

        if let Err(e) = outcome {
            self.release_cooldown(&key, previous);
            self.counters().failures += 1;
            error!("{} for {:?} failed: {}", decision.action, decision.target_nodes, e);
            return Err(e.wrap(
                ErrorCode::ScalingFailed,
                format!("{} for {} failed", decision.action, key),
            ));
        }

        {
            let mut counters = self.counters();
            match decision.action {
                ScalingAction::ScaleUp => counters.scale_ups += 1,
                ScalingAction::ScaleDown => counters.scale_downs += 1,
                ScalingAction::NoAction => {}
            }
            counters.total_impact += decision.expected_impact.abs();
        }
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() >= HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(decision.clone());
        }

        self.metrics.record_scaling_event();
        info!(
            "Executed {} for {:?}: {}",
            decision.action, decision.target_nodes, decision.reason
        );
        self.events.emit(OrchestratorEvent::ScalingExecuted {
            decision: decision.clone(),
        });
        Ok(Some(decision))
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the cooldown slot of `node_id`.
    ///
    /// # Returns
    /// The slot's previous value to restore on failure, or `None` if the
    /// node is still cooling down
    fn reserve_cooldown(&self, node_id: &str, now: u64, cooldown_ms: u64) -> Option<Option<u64>> {
        let mut last_action = self.last_action.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = last_action.get(node_id).copied();
        if previous.is_some_and(|at| now.saturating_sub(at) < cooldown_ms) {
            return None;
        }
        last_action.insert(node_id.to_string(), now);
        Some(previous)
    }

    fn release_cooldown(&self, node_id: &str, previous: Option<u64>) {
        let mut last_action = self.last_action.lock().unwrap_or_else(PoisonError::into_inner);
        match previous {
            Some(at) => last_action.insert(node_id.to_string(), at),
            None => last_action.remove(node_id),
        };
    }

    pub fn is_within_cooldown(&self, node_id: &str) -> bool {
        let cooldown_ms = self.config().cooldown().as_millis() as u64;
        let now = now_millis();
        self.last_action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .is_some_and(|at| now.saturating_sub(*at) < cooldown_ms)
    }

    /// Up to `limit` most recent decisions, newest first.
    pub fn get_scaling_history(&self, limit: usize) -> Vec<ScalingDecision> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_scaling_stats(&self) -> ScalingStats {
        let config = self.config();
        let counters = self.counters();
        let executed = counters.scale_ups + counters.scale_downs;
        let last_decision = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned();
        let nodes_in_cooldown = {
            let now = now_millis();
            let cooldown_ms = config.cooldown().as_millis() as u64;
            self.last_action
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .filter(|at| now.saturating_sub(**at) < cooldown_ms)
                .count()
        };

        ScalingStats {
            enabled: config.enabled,
            total_decisions: executed,
            scale_ups: counters.scale_ups,
            scale_downs: counters.scale_downs,
            failures: counters.failures,
            skipped_cooldown: counters.skipped_cooldown,
            average_impact: if executed == 0 {
                0.0
            } else {
                counters.total_impact / executed as f64
            },
            nodes_in_cooldown,
            last_decision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthMonitoringConfig;
    use crate::test_support::{load, FakeTransport};
    use helmsman_common::NodeInfo;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::RwLock;

    fn input(config: ScalingConfig, samples: &[(&str, f64)]) -> ScalingInput {
        ScalingInput {
            node_count: samples.len(),
            loads: samples
                .iter()
                .map(|(id, cpu)| NodeLoad {
                    node_id: id.to_string(),
                    latest: load(*cpu, 0.0),
                    history: Vec::new(),
                })
                .collect(),
            config,
            now: 1_000,
        }
    }

    fn config() -> ScalingConfig {
        ScalingConfig {
            min_nodes: 1,
            max_nodes: 10,
            scale_up_threshold: 75.0,
            scale_down_threshold: 25.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_threshold_evaluator_scale_up_targets_hot_nodes() {
        let decision = ThresholdEvaluator.evaluate(&input(config(), &[("a", 80.0), ("b", 95.0), ("c", 70.0)]));
        assert_eq!(decision.action, ScalingAction::ScaleUp);
        assert_eq!(decision.target_nodes, vec!["b", "a"]);
        assert!(decision.expected_impact < 0.0);
    }

    #[test]
    fn test_threshold_evaluator_scale_down_targets_coolest() {
        let decision = ThresholdEvaluator.evaluate(&input(config(), &[("a", 10.0), ("b", 5.0)]));
        assert_eq!(decision.action, ScalingAction::ScaleDown);
        assert_eq!(decision.target_nodes, vec!["b"]);
    }

    #[test]
    fn test_threshold_evaluator_respects_fleet_bounds() {
        let mut at_max = config();
        at_max.max_nodes = 2;
        let decision = ThresholdEvaluator.evaluate(&input(at_max, &[("a", 90.0), ("b", 90.0)]));
        assert_eq!(decision.action, ScalingAction::NoAction);

        let mut at_min = config();
        at_min.min_nodes = 2;
        let decision = ThresholdEvaluator.evaluate(&input(at_min, &[("a", 1.0), ("b", 1.0)]));
        assert_eq!(decision.action, ScalingAction::NoAction);

        let decision = ThresholdEvaluator.evaluate(&input(config(), &[]));
        assert_eq!(decision.action, ScalingAction::NoAction);
    }

    #[test]
    fn test_predictive_scaling_projects_trend() {
        let mut config = config();
        config.predictive_scaling = true;
        config.evaluation_interval = 10_000;

        // rising 1 point per second, currently at 70
        let history: Vec<LoadMetrics> = (0..5)
            .map(|i| LoadMetrics {
                timestamp: i * 1000,
                ..load(66.0 + i as f64, 0.0)
            })
            .collect();
        let input = ScalingInput {
            node_count: 1,
            loads: vec![NodeLoad {
                node_id: "a".to_string(),
                latest: history[4].clone(),
                history,
            }],
            config,
            now: 4_000,
        };
        let decision = ThresholdEvaluator.evaluate(&input);
        assert_eq!(decision.action, ScalingAction::ScaleUp);
    }

    #[test]
    fn test_trend_needs_two_samples() {
        assert_eq!(trend_per_ms(&[load(10.0, 0.0)]), None);
    }

    struct FlakyExecutor {
        fail: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ScalingExecutor for FlakyExecutor {
        async fn scale_up(&self, _node_ids: &[String]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) > 0 {
                self.fail.fetch_sub(1, Ordering::SeqCst);
                return Err(OrchestratorError::ScalingFailed("provider refused".to_string()));
            }
            Ok(())
        }

        async fn scale_down(&self, _node_ids: &[String]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn service(
        config: ScalingConfig,
        evaluator: Arc<dyn ScalingEvaluator>,
        executor: Arc<dyn ScalingExecutor>,
    ) -> (Arc<AutoScalingService>, EventBus) {
        let nodes: SharedNodes = Arc::new(RwLock::new(HashMap::new()));
        let transport = Arc::new(FakeTransport::default());
        for id in ["a", "b"] {
            nodes
                .write()
                .await
                .insert(id.to_string(), NodeInfo::new(id, "eu", "10.0.0.1", 80));
            transport.set_metrics(id, load(90.0, 10.0));
        }
        let events = EventBus::new();
        let metrics = OrchestratorMetricsCollector::new();
        let health = Arc::new(HealthMonitoringService::new(
            HealthMonitoringConfig::default(),
            nodes.clone(),
            transport,
            events.clone(),
            metrics.clone(),
        ));
        health.collect_all_metrics().await;

        let service = Arc::new(AutoScalingService::new(
            config, nodes, health, evaluator, executor, events.clone(), metrics,
        ));
        (service, events)
    }

    #[tokio::test]
    async fn test_cooldown_allows_one_decision_per_target() {
        let (service, events) =
            service(config(), Arc::new(ThresholdEvaluator), Arc::new(LoggingScalingExecutor)).await;
        let mut rx = events.subscribe();

        let first = service.evaluate_and_scale().await.unwrap();
        let second = service.evaluate_and_scale().await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let target = &first.unwrap().target_nodes[0];
        assert!(service.is_within_cooldown(target));

        let stats = service.get_scaling_stats();
        assert_eq!(stats.scale_ups, 1);
        assert_eq!(stats.skipped_cooldown, 1);
        assert_eq!(stats.nodes_in_cooldown, 1);
        assert_eq!(service.get_scaling_history(10).len(), 1);
        assert!(matches!(
            rx.try_recv().unwrap(),
            OrchestratorEvent::ScalingExecuted { .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_execution_releases_cooldown() {
        let executor = Arc::new(FlakyExecutor {
            fail: AtomicU32::new(1),
            calls: AtomicU32::new(0),
        });
        let (service, _) = service(config(), Arc::new(ThresholdEvaluator), executor.clone()).await;

        let err = service.evaluate_and_scale().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ScalingFailed);
        assert!(!service.is_within_cooldown("a"));
        assert!(service.get_scaling_history(10).is_empty());

        // the next tick retries immediately
        assert!(service.evaluate_and_scale().await.unwrap().is_some());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.get_scaling_stats().failures, 1);
    }

    #[tokio::test]
    async fn test_closure_evaluator_and_manual_scale() {
        let evaluator = |_: &ScalingInput| ScalingDecision::no_action("steady");
        let (service, _) = service(config(), Arc::new(evaluator), Arc::new(LoggingScalingExecutor)).await;
        assert!(service.evaluate_and_scale().await.unwrap().is_none());

        let decision = service
            .manual_scale(ScalingAction::ScaleDown, vec!["b".to_string()], "maintenance")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decision.reason, "manual: maintenance");

        // manual actions share the cooldown
        let skipped = service
            .manual_scale(ScalingAction::ScaleUp, vec!["b".to_string()], "again")
            .await
            .unwrap();
        assert!(skipped.is_none());

        let err = service
            .manual_scale(ScalingAction::ScaleUp, Vec::new(), "nothing")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ScalingFailed);
    }

    #[tokio::test]
    async fn test_zero_cooldown_and_disabled() {
        let mut config = config();
        config.cooldown_period = 0;
        let (service, _) =
            service(config.clone(), Arc::new(ThresholdEvaluator), Arc::new(LoggingScalingExecutor)).await;
        assert!(service.evaluate_and_scale().await.unwrap().is_some());
        assert!(service.evaluate_and_scale().await.unwrap().is_some());
        assert_eq!(service.get_scaling_history(1).len(), 1);

        config.enabled = false;
        service.update_config(config).await.unwrap();
        assert!(service.evaluate_and_scale().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_thresholds_validates() {
        let (service, _) =
            service(config(), Arc::new(ThresholdEvaluator), Arc::new(LoggingScalingExecutor)).await;
        assert!(service.update_scaling_thresholds(60.0, 70.0).is_err());
        assert!(service.update_scaling_thresholds(120.0, 10.0).is_err());

        // raising the threshold above the current load stops scale up
        service.update_scaling_thresholds(95.0, 5.0).unwrap();
        assert!(service.evaluate_and_scale().await.unwrap().is_none());
    }
}
