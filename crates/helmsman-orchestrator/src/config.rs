//! Orchestrator policy tree and its hot-reloadable store.
//!
//! [`ConfigurationManager`] owns the single process-wide
//! [`OrchestratorConfig`]. Readers get an immutable `Arc` snapshot; updates
//! are validated on the merged result, written to disk and only then swapped
//! in. Subscribers are notified through a `tokio::sync::watch` channel, both
//! for API-driven updates and for external edits picked up by the file
//! watcher.

use helmsman_common::{OrchestratorError, Result, RoutingAlgorithm};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_ORCHESTRATOR_ID: &str = "global-orchestrator";

/// Delay between a file event and the reload it triggers.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    pub orchestrator_id: String,
    pub discovery: DiscoveryConfig,
    pub health_monitoring: HealthMonitoringConfig,
    pub routing: RoutingConfig,
    pub scaling: ScalingConfig,
    pub failover: FailoverConfig,
    pub federation: FederationConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            orchestrator_id: DEFAULT_ORCHESTRATOR_ID.to_string(),
            discovery: DiscoveryConfig::default(),
            health_monitoring: HealthMonitoringConfig::default(),
            routing: RoutingConfig::default(),
            scaling: ScalingConfig::default(),
            failover: FailoverConfig::default(),
            federation: FederationConfig::default(),
        }
    }
}

/// Node discovery settings. Intervals and timeouts are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// Registry polled for nodes; polling is skipped when unset
    pub service_registry_url: Option<String>,
    pub discovery_interval: u64,
    pub heartbeat_interval: u64,
    /// A node not refreshed within this window is evicted
    pub node_timeout: u64,
    /// Registry attempts per discovery cycle
    pub max_retries: u32,
    pub request_timeout: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_registry_url: None,
            discovery_interval: 30_000,
            heartbeat_interval: 10_000,
            node_timeout: 60_000,
            max_retries: 3,
            request_timeout: 5_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn discovery_period(&self) -> Duration {
        Duration::from_millis(self.discovery_interval)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }
}

/// Health probing settings. Intervals and timeouts are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthMonitoringConfig {
    pub enabled: bool,
    pub check_interval: u64,
    pub timeout: u64,
    /// Consecutive failed probes before a node is resolved unhealthy
    pub unhealthy_threshold: u32,
    /// Consecutive good probes before a node is resolved healthy
    pub healthy_threshold: u32,
    pub metrics_collection_interval: u64,
    /// Samples kept per node
    pub metrics_history_size: usize,
}

impl Default for HealthMonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: 15_000,
            timeout: 5_000,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            metrics_collection_interval: 30_000,
            metrics_history_size: 100,
        }
    }
}

impl HealthMonitoringConfig {
    pub fn check_period(&self) -> Duration {
        Duration::from_millis(self.check_interval)
    }

    pub fn metrics_period(&self) -> Duration {
        Duration::from_millis(self.metrics_collection_interval)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    Weighted,
    Equal,
    Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingConfig {
    pub algorithm: RoutingAlgorithm,
    pub load_balancing_strategy: LoadBalancingStrategy,
    pub geo_routing_enabled: bool,
    /// Response time in milliseconds above which a node scores poorly
    pub latency_threshold: f64,
    /// Utilisation in percent above which a node scores poorly
    pub capacity_threshold: f64,
    pub adaptive_routing: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            algorithm: RoutingAlgorithm::Adaptive,
            load_balancing_strategy: LoadBalancingStrategy::Weighted,
            geo_routing_enabled: true,
            latency_threshold: 100.0,
            capacity_threshold: 80.0,
            adaptive_routing: true,
        }
    }
}

/// Auto-scaling settings.
///
/// `cooldown_period` and `metrics_window` are in seconds,
/// `evaluation_interval` in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScalingConfig {
    pub enabled: bool,
    pub min_nodes: usize,
    pub max_nodes: usize,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub cooldown_period: u64,
    pub predictive_scaling: bool,
    pub metrics_window: u64,
    pub evaluation_interval: u64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_nodes: 3,
            max_nodes: 50,
            scale_up_threshold: 75.0,
            scale_down_threshold: 25.0,
            cooldown_period: 300,
            predictive_scaling: false,
            metrics_window: 300,
            evaluation_interval: 30_000,
        }
    }
}

impl ScalingConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_period)
    }

    pub fn evaluation_period(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval)
    }
}

/// What happens when a former primary comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum FailbackPolicy {
    /// Log the recovery, keep the current primary
    #[default]
    None,
    /// Promote the group's original primary back once it recovers
    PreferredPrimary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailoverConfig {
    pub enabled: bool,
    /// Seeds the `default` failover group together with `backup_nodes`
    pub primary_node_id: Option<String>,
    pub backup_nodes: Vec<String>,
    /// Milliseconds
    pub failover_timeout: u64,
    pub auto_recovery: bool,
    pub data_replication: bool,
    pub failback_policy: FailbackPolicy,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary_node_id: None,
            backup_nodes: Vec::new(),
            failover_timeout: 30_000,
            auto_recovery: true,
            data_replication: true,
            failback_policy: FailbackPolicy::None,
        }
    }
}

impl FailoverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.failover_timeout)
    }
}

/// Credentials presented to a federation manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationAuth {
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationManagerConfig {
    pub federation_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub auth: Option<FederationAuth>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FederationConfig {
    pub federation_managers: Vec<FederationManagerConfig>,
    pub message_routing_enabled: bool,
    pub cross_federation_communication: bool,
    pub shared_state_sync: bool,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            federation_managers: Vec::new(),
            message_routing_enabled: true,
            cross_federation_communication: true,
            shared_state_sync: true,
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl OrchestratorConfig {
    /// Checks every constraint on the policy tree.
    ///
    /// All violations are reported in one error.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.orchestrator_id.trim().is_empty() {
            errors.push("orchestratorId must not be empty".to_string());
        }

        let d = &self.discovery;
        for (name, value) in [
            ("discovery.discoveryInterval", d.discovery_interval),
            ("discovery.heartbeatInterval", d.heartbeat_interval),
            ("discovery.nodeTimeout", d.node_timeout),
            ("discovery.requestTimeout", d.request_timeout),
        ] {
            if value == 0 {
                errors.push(format!("{} must be greater than 0", name));
            }
        }
        if let Some(url) = &d.service_registry_url {
            if !is_http_url(url) {
                errors.push(format!(
                    "discovery.serviceRegistryUrl must start with http:// or https://, got {}",
                    url
                ));
            }
        }

        let h = &self.health_monitoring;
        for (name, value) in [
            ("healthMonitoring.checkInterval", h.check_interval),
            ("healthMonitoring.timeout", h.timeout),
            ("healthMonitoring.metricsCollectionInterval", h.metrics_collection_interval),
        ] {
            if value == 0 {
                errors.push(format!("{} must be greater than 0", name));
            }
        }
        if h.unhealthy_threshold < 1 {
            errors.push("healthMonitoring.unhealthyThreshold must be at least 1".to_string());
        }
        if h.healthy_threshold < 1 {
            errors.push("healthMonitoring.healthyThreshold must be at least 1".to_string());
        }
        if h.metrics_history_size < 1 {
            errors.push("healthMonitoring.metricsHistorySize must be at least 1".to_string());
        }

        let r = &self.routing;
        if !(r.latency_threshold >= 0.0) {
            errors.push("routing.latencyThreshold must be non-negative".to_string());
        }
        if !(0.0..=100.0).contains(&r.capacity_threshold) {
            errors.push("routing.capacityThreshold must be between 0 and 100".to_string());
        }

        let s = &self.scaling;
        if s.min_nodes > s.max_nodes {
            errors.push(format!(
                "scaling.minNodes ({}) must not exceed scaling.maxNodes ({})",
                s.min_nodes, s.max_nodes
            ));
        }
        if !(0.0..=100.0).contains(&s.scale_up_threshold) {
            errors.push("scaling.scaleUpThreshold must be between 0 and 100".to_string());
        }
        if !(0.0..=100.0).contains(&s.scale_down_threshold) {
            errors.push("scaling.scaleDownThreshold must be between 0 and 100".to_string());
        }
        if s.scale_down_threshold >= s.scale_up_threshold {
            errors.push(
                "scaling.scaleDownThreshold must be lower than scaling.scaleUpThreshold".to_string(),
            );
        }
        if s.evaluation_interval == 0 {
            errors.push("scaling.evaluationInterval must be greater than 0".to_string());
        }
        if s.metrics_window == 0 {
            errors.push("scaling.metricsWindow must be greater than 0".to_string());
        }

        let f = &self.failover;
        if f.failover_timeout == 0 {
            errors.push("failover.failoverTimeout must be greater than 0".to_string());
        }
        if let Some(primary) = &f.primary_node_id {
            if f.backup_nodes.contains(primary) {
                errors.push(format!(
                    "failover.backupNodes must not contain the primary node {}",
                    primary
                ));
            }
        }

        for manager in &self.federation.federation_managers {
            if manager.federation_id.trim().is_empty() {
                errors.push("federation manager federationId must not be empty".to_string());
            }
            if !is_http_url(&manager.endpoint) {
                errors.push(format!(
                    "federation manager {} endpoint must start with http:// or https://",
                    manager.federation_id
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Configuration(errors.join("; ")))
        }
    }
}

// ============================================================================
// Partial updates
// ============================================================================

/// A partial configuration, deep-merged over the current one.
///
/// Unknown keys are rejected so a misspelled field fails loudly instead of
/// being silently ignored. Optional string settings are cleared with an
/// empty string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct OrchestratorConfigPatch {
    pub orchestrator_id: Option<String>,
    pub discovery: Option<DiscoveryPatch>,
    pub health_monitoring: Option<HealthMonitoringPatch>,
    pub routing: Option<RoutingPatch>,
    pub scaling: Option<ScalingPatch>,
    pub failover: Option<FailoverPatch>,
    pub federation: Option<FederationPatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct DiscoveryPatch {
    pub enabled: Option<bool>,
    pub service_registry_url: Option<String>,
    pub discovery_interval: Option<u64>,
    pub heartbeat_interval: Option<u64>,
    pub node_timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub request_timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct HealthMonitoringPatch {
    pub enabled: Option<bool>,
    pub check_interval: Option<u64>,
    pub timeout: Option<u64>,
    pub unhealthy_threshold: Option<u32>,
    pub healthy_threshold: Option<u32>,
    pub metrics_collection_interval: Option<u64>,
    pub metrics_history_size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RoutingPatch {
    pub algorithm: Option<RoutingAlgorithm>,
    pub load_balancing_strategy: Option<LoadBalancingStrategy>,
    pub geo_routing_enabled: Option<bool>,
    pub latency_threshold: Option<f64>,
    pub capacity_threshold: Option<f64>,
    pub adaptive_routing: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ScalingPatch {
    pub enabled: Option<bool>,
    pub min_nodes: Option<usize>,
    pub max_nodes: Option<usize>,
    pub scale_up_threshold: Option<f64>,
    pub scale_down_threshold: Option<f64>,
    pub cooldown_period: Option<u64>,
    pub predictive_scaling: Option<bool>,
    pub metrics_window: Option<u64>,
    pub evaluation_interval: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct FailoverPatch {
    pub enabled: Option<bool>,
    pub primary_node_id: Option<String>,
    pub backup_nodes: Option<Vec<String>>,
    pub failover_timeout: Option<u64>,
    pub auto_recovery: Option<bool>,
    pub data_replication: Option<bool>,
    pub failback_policy: Option<FailbackPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct FederationPatch {
    pub federation_managers: Option<Vec<FederationManagerConfig>>,
    pub message_routing_enabled: Option<bool>,
    pub cross_federation_communication: Option<bool>,
    pub shared_state_sync: Option<bool>,
}

fn set<T>(target: &mut T, value: &Option<T>)
where
    T: Clone,
{
    if let Some(value) = value {
        *target = value.clone();
    }
}

fn set_optional_string(target: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value {
        *target = (!value.is_empty()).then(|| value.clone());
    }
}

impl OrchestratorConfigPatch {
    /// Merges this patch over `config`, field by field.
    pub fn apply_to(&self, config: &mut OrchestratorConfig) {
        set(&mut config.orchestrator_id, &self.orchestrator_id);

        if let Some(p) = &self.discovery {
            let c = &mut config.discovery;
            set(&mut c.enabled, &p.enabled);
            set_optional_string(&mut c.service_registry_url, &p.service_registry_url);
            set(&mut c.discovery_interval, &p.discovery_interval);
            set(&mut c.heartbeat_interval, &p.heartbeat_interval);
            set(&mut c.node_timeout, &p.node_timeout);
            set(&mut c.max_retries, &p.max_retries);
            set(&mut c.request_timeout, &p.request_timeout);
        }

        if let Some(p) = &self.health_monitoring {
            let c = &mut config.health_monitoring;
            set(&mut c.enabled, &p.enabled);
            set(&mut c.check_interval, &p.check_interval);
            set(&mut c.timeout, &p.timeout);
            set(&mut c.unhealthy_threshold, &p.unhealthy_threshold);
            set(&mut c.healthy_threshold, &p.healthy_threshold);
            set(&mut c.metrics_collection_interval, &p.metrics_collection_interval);
            set(&mut c.metrics_history_size, &p.metrics_history_size);
        }

        if let Some(p) = &self.routing {
            let c = &mut config.routing;
            set(&mut c.algorithm, &p.algorithm);
            set(&mut c.load_balancing_strategy, &p.load_balancing_strategy);
            set(&mut c.geo_routing_enabled, &p.geo_routing_enabled);
            set(&mut c.latency_threshold, &p.latency_threshold);
            set(&mut c.capacity_threshold, &p.capacity_threshold);
            set(&mut c.adaptive_routing, &p.adaptive_routing);
        }

        if let Some(p) = &self.scaling {
            let c = &mut config.scaling;
            set(&mut c.enabled, &p.enabled);
            set(&mut c.min_nodes, &p.min_nodes);
            set(&mut c.max_nodes, &p.max_nodes);
            set(&mut c.scale_up_threshold, &p.scale_up_threshold);
            set(&mut c.scale_down_threshold, &p.scale_down_threshold);
            set(&mut c.cooldown_period, &p.cooldown_period);
            set(&mut c.predictive_scaling, &p.predictive_scaling);
            set(&mut c.metrics_window, &p.metrics_window);
            set(&mut c.evaluation_interval, &p.evaluation_interval);
        }

        if let Some(p) = &self.failover {
            let c = &mut config.failover;
            set(&mut c.enabled, &p.enabled);
            set_optional_string(&mut c.primary_node_id, &p.primary_node_id);
            set(&mut c.backup_nodes, &p.backup_nodes);
            set(&mut c.failover_timeout, &p.failover_timeout);
            set(&mut c.auto_recovery, &p.auto_recovery);
            set(&mut c.data_replication, &p.data_replication);
            set(&mut c.failback_policy, &p.failback_policy);
        }

        if let Some(p) = &self.federation {
            let c = &mut config.federation;
            set(&mut c.federation_managers, &p.federation_managers);
            set(&mut c.message_routing_enabled, &p.message_routing_enabled);
            set(&mut c.cross_federation_communication, &p.cross_federation_communication);
            set(&mut c.shared_state_sync, &p.shared_state_sync);
        }
    }

    /// Builds a patch setting the single value at a dotted path.
    ///
    /// # Arguments
    /// * `path` - Dotted camelCase path, e.g. `scaling.maxNodes`
    /// * `value` - The new value
    ///
    /// # Returns
    /// The patch, or a configuration error if the path is unknown or the
    /// value has the wrong type
    pub fn from_path(path: &str, value: Value) -> Result<Self> {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(OrchestratorError::Configuration(
                "configuration path must not be empty".to_string(),
            ));
        }

        let nested = segments.iter().rev().fold(value, |inner, segment| {
            let mut object = serde_json::Map::new();
            object.insert(segment.to_string(), inner);
            Value::Object(object)
        });

        serde_json::from_value(nested).map_err(|e| {
            OrchestratorError::Configuration(format!("cannot set {}: {}", path, e))
        })
    }
}

// ============================================================================
// Configuration manager
// ============================================================================

/// Short description of the live configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub orchestrator_id: String,
    pub discovery_enabled: bool,
    pub health_monitoring_enabled: bool,
    pub scaling_enabled: bool,
    pub failover_enabled: bool,
    pub routing_algorithm: RoutingAlgorithm,
    pub federation_managers: usize,
    pub config_path: Option<PathBuf>,
}

struct FileWatch {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

/// Owner of the live [`OrchestratorConfig`].
pub struct ConfigurationManager {
    path: Option<PathBuf>,
    current: watch::Sender<Arc<OrchestratorConfig>>,
    /// Serializes updates; held across validation, persistence and swap
    update_lock: Mutex<()>,
    file_watch: std::sync::Mutex<Option<FileWatch>>,
}

impl ConfigurationManager {
    /// Creates a manager backed by `path`, or an in-memory one when `None`.
    ///
    /// The built-in defaults are live until [`initialize`](Self::initialize)
    /// is called.
    pub fn new(path: Option<PathBuf>) -> Self {
        let (current, _) = watch::channel(Arc::new(OrchestratorConfig::default()));
        Self {
            path,
            current,
            update_lock: Mutex::new(()),
            file_watch: std::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Loads the configuration file, or persists the defaults if it is absent.
    pub async fn initialize(&self) -> Result<Arc<OrchestratorConfig>> {
        let _guard = self.update_lock.lock().await;

        let config = match &self.path {
            None => OrchestratorConfig::default(),
            Some(path) if path.exists() => {
                let config = load_from_file(path)?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            Some(path) => {
                let config = OrchestratorConfig::default();
                persist(path, &config)?;
                info!("Wrote default configuration to {}", path.display());
                config
            }
        };

        let config = Arc::new(config);
        self.current.send_replace(config.clone());
        Ok(config)
    }

    /// Current configuration snapshot.
    pub fn get_config(&self) -> Arc<OrchestratorConfig> {
        self.current.borrow().clone()
    }

    /// Receiver notified on every applied change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<OrchestratorConfig>> {
        self.current.subscribe()
    }

    /// Validates and applies a partial update.
    pub async fn update_config(
        &self,
        patch: &OrchestratorConfigPatch,
    ) -> Result<Arc<OrchestratorConfig>> {
        self.update_with(|config| {
            patch.apply_to(config);
            Ok(())
        })
        .await
    }

    /// Applies `mutate` to a copy of the current configuration.
    ///
    /// The merged result is validated and persisted before it becomes
    /// visible; on any failure the live configuration is left unchanged.
    pub async fn update_with<F>(&self, mutate: F) -> Result<Arc<OrchestratorConfig>>
    where
        F: FnOnce(&mut OrchestratorConfig) -> Result<()>,
    {
        let _guard = self.update_lock.lock().await;

        let mut next = (*self.get_config()).clone();
        mutate(&mut next)?;
        next.validate()?;

        if let Some(path) = &self.path {
            persist(path, &next)?;
        }

        let next = Arc::new(next);
        self.current.send_replace(next.clone());
        debug!("Configuration updated");
        Ok(next)
    }

    /// Replaces the configuration with the built-in defaults.
    pub async fn reset_to_defaults(&self) -> Result<Arc<OrchestratorConfig>> {
        self.update_with(|config| {
            *config = OrchestratorConfig::default();
            Ok(())
        })
        .await
    }

    /// Reads the value at a dotted camelCase path, e.g. `scaling.maxNodes`.
    pub fn get_config_value(&self, path: &str) -> Result<Value> {
        let root = serde_json::to_value(&*self.get_config())?;
        path.split('.')
            .filter(|s| !s.is_empty())
            .try_fold(&root, |node, segment| node.get(segment))
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::Configuration(format!("unknown configuration path {}", path))
            })
    }

    /// Sets the value at a dotted camelCase path.
    pub async fn set_config_value(&self, path: &str, value: Value) -> Result<Arc<OrchestratorConfig>> {
        let patch = OrchestratorConfigPatch::from_path(path, value)?;
        self.update_config(&patch).await
    }

    pub fn get_config_summary(&self) -> ConfigSummary {
        let config = self.get_config();
        ConfigSummary {
            orchestrator_id: config.orchestrator_id.clone(),
            discovery_enabled: config.discovery.enabled,
            health_monitoring_enabled: config.health_monitoring.enabled,
            scaling_enabled: config.scaling.enabled,
            failover_enabled: config.failover.enabled,
            routing_algorithm: config.routing.algorithm,
            federation_managers: config.federation.federation_managers.len(),
            config_path: self.path.clone(),
        }
    }

    /// Re-reads the file and applies it if it differs from the live config.
    ///
    /// # Returns
    /// `true` if a new configuration was applied
    pub async fn reload(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let _guard = self.update_lock.lock().await;
        let loaded = load_from_file(path)?;
        if loaded == *self.get_config() {
            return Ok(false);
        }

        self.current.send_replace(Arc::new(loaded));
        info!("Configuration reloaded from {}", path.display());
        Ok(true)
    }

    /// Starts watching the configuration file for external edits.
    ///
    /// Does nothing for an in-memory manager or if already watching.
    pub fn start_watching(self: &Arc<Self>) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let mut slot = self.file_watch.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }

        // Writes go through rename, so the directory is watched rather than the file
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path.file_name().map(|n| n.to_os_string());

        let (file_tx, mut file_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant {
                        let _ = file_tx.send(());
                    }
                }
                Err(e) => warn!("Config file watch error: {}", e),
            }
        })
        .map_err(|e| OrchestratorError::Configuration(format!("Failed to create file watcher: {}", e)))?;

        watcher.watch(&dir, RecursiveMode::NonRecursive).map_err(|e| {
            OrchestratorError::Configuration(format!(
                "Failed to watch config directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while file_rx.recv().await.is_some() {
                tokio::time::sleep(RELOAD_DEBOUNCE).await;
                while file_rx.try_recv().is_ok() {}

                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = manager.reload().await {
                    warn!("Ignoring external configuration change: {}", e);
                }
            }
        });

        *slot = Some(FileWatch {
            _watcher: watcher,
            task,
        });
        info!("Watching {} for configuration changes", path.display());
        Ok(())
    }

    /// Stops the file watcher, if running.
    pub fn stop_watching(&self) {
        let watch = self
            .file_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watch) = watch {
            watch.task.abort();
            debug!("Stopped configuration file watcher");
        }
    }
}

impl Drop for ConfigurationManager {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

fn load_from_file(path: &Path) -> Result<OrchestratorConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        OrchestratorError::Configuration(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let config: OrchestratorConfig = serde_json::from_str(&content).map_err(|e| {
        OrchestratorError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    config.validate()?;
    Ok(config)
}

/// Writes `config` to a temporary file next to `path` and renames it into place.
fn persist(path: &Path, config: &OrchestratorConfig) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, config)?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| {
        OrchestratorError::Configuration(format!("Failed to write {}: {}", path.display(), e.error))
    })?;
    Ok(())
}
