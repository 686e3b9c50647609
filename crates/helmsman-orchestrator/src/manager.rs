use helmsman_common::time::now_millis;
use helmsman_common::{
    ErrorCode, HealthStatus, HttpNodeTransport, NodeInfo, NodeTransport, OrchestratorError,
    OrchestratorMessage, Result, RoutingDecision,
};
use helmsman_metrics::{
    GlobalMetrics, OrchestratorMetricsCollector, ServerInfo, ServiceHealthReport, ServiceKind,
};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{
    ConfigSummary, ConfigurationManager, FederationAuth, FederationManagerConfig,
    OrchestratorConfig, OrchestratorConfigPatch,
};
use crate::discovery::NodeDiscoveryService;
use crate::events::{EventBus, OrchestratorEvent};
use crate::failover::{
    FailoverEvent, FailoverExecutor, FailoverGroup, FailoverService, FailoverStrategy,
    StateSwitchExecutor,
};
use crate::health_monitor::HealthMonitoringService;
use crate::routing::IntelligentRoutingService;
use crate::scaling::{
    AutoScalingService, LoggingScalingExecutor, ScalingAction, ScalingDecision, ScalingEvaluator,
    ScalingExecutor, ThresholdEvaluator,
};
use crate::topology::{build_topology, GlobalTopology, TopologyInputs};

/// Wraps a service error for callers of the facade, keeping it as the cause.
fn facade_error(operation: &'static str) -> impl FnOnce(OrchestratorError) -> OrchestratorError {
    move |e| {
        let code = e.code();
        e.wrap(code, format!("{} failed", operation))
    }
}

/// Builder for [`GlobalOrchestrator`].
///
/// Every capability has a default: an HTTP transport, the threshold
/// evaluator, and executors that only log or switch state.
#[derive(Default)]
pub struct GlobalOrchestratorBuilder {
    config_path: Option<PathBuf>,
    transport: Option<Arc<dyn NodeTransport>>,
    evaluator: Option<Arc<dyn ScalingEvaluator>>,
    scaling_executor: Option<Arc<dyn ScalingExecutor>>,
    failover_executor: Option<Arc<dyn FailoverExecutor>>,
}

impl GlobalOrchestratorBuilder {
    /// Backs the configuration with a JSON file; without one it lives in memory.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn transport(mut self, transport: Arc<dyn NodeTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn scaling_evaluator(mut self, evaluator: Arc<dyn ScalingEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn scaling_executor(mut self, executor: Arc<dyn ScalingExecutor>) -> Self {
        self.scaling_executor = Some(executor);
        self
    }

    pub fn failover_executor(mut self, executor: Arc<dyn FailoverExecutor>) -> Self {
        self.failover_executor = Some(executor);
        self
    }

    /// Wires all services together. Nothing runs until
    /// [`GlobalOrchestrator::start`].
    pub fn build(self) -> Result<Arc<GlobalOrchestrator>> {
        let transport: Arc<dyn NodeTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpNodeTransport::new().map_err(|e| {
                OrchestratorError::Configuration(format!("failed to create HTTP transport: {}", e))
            })?),
        };

        let evaluator: Arc<dyn ScalingEvaluator> = match self.evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(ThresholdEvaluator),
        };
        let scaling_executor: Arc<dyn ScalingExecutor> = match self.scaling_executor {
            Some(executor) => executor,
            None => Arc::new(LoggingScalingExecutor),
        };
        let failover_executor: Arc<dyn FailoverExecutor> = match self.failover_executor {
            Some(executor) => executor,
            None => Arc::new(StateSwitchExecutor),
        };

        let defaults = OrchestratorConfig::default();
        let metrics = OrchestratorMetricsCollector::new();
        let internal = EventBus::new();

        let discovery = Arc::new(NodeDiscoveryService::new(
            defaults.discovery.clone(),
            defaults.orchestrator_id.clone(),
            transport.clone(),
            internal.clone(),
            metrics.clone(),
        ));
        let health = Arc::new(HealthMonitoringService::new(
            defaults.health_monitoring.clone(),
            discovery.shared_nodes(),
            transport,
            internal.clone(),
            metrics.clone(),
        ));
        let routing = Arc::new(IntelligentRoutingService::new(
            defaults.routing.clone(),
            metrics.clone(),
        ));
        let scaling = Arc::new(AutoScalingService::new(
            defaults.scaling.clone(),
            discovery.shared_nodes(),
            health.clone(),
            evaluator,
            scaling_executor,
            internal.clone(),
            metrics.clone(),
        ));
        let failover = Arc::new(FailoverService::new(
            defaults.failover.clone(),
            failover_executor,
            internal.clone(),
            metrics.clone(),
        ));

        Ok(Arc::new(GlobalOrchestrator {
            config: Arc::new(ConfigurationManager::new(self.config_path)),
            discovery,
            health,
            routing,
            scaling,
            failover,
            metrics,
            internal,
            external: EventBus::new(),
            topology: RwLock::new(GlobalTopology::empty()),
            run: Mutex::new(None),
        }))
    }
}

/// Bookkeeping of a started orchestrator.
struct RunState {
    started_at: Instant,
    pumps: Vec<JoinHandle<()>>,
}

/// Global fleet orchestrator.
///
/// Composes the configuration manager, node discovery, health monitoring,
/// routing, auto-scaling and failover. Services report to the orchestrator
/// through an internal event bus; the orchestrator keeps the routing table
/// and the [`GlobalTopology`] in step with them and re-publishes their
/// events to external subscribers.
///
/// # Lifecycle
///
/// [`start`](Self::start) loads the configuration and starts every service;
/// either all of them run afterwards or none do. [`stop`](Self::stop) is
/// idempotent. A stopped orchestrator can be started again.
pub struct GlobalOrchestrator {
    config: Arc<ConfigurationManager>,
    discovery: Arc<NodeDiscoveryService>,
    health: Arc<HealthMonitoringService>,
    routing: Arc<IntelligentRoutingService>,
    scaling: Arc<AutoScalingService>,
    failover: Arc<FailoverService>,
    metrics: OrchestratorMetricsCollector,
    /// Services emit here
    internal: EventBus,
    /// Subscribers of the orchestrator listen here
    external: EventBus,
    topology: RwLock<GlobalTopology>,
    run: Mutex<Option<RunState>>,
}

impl GlobalOrchestrator {
    pub fn builder() -> GlobalOrchestratorBuilder {
        GlobalOrchestratorBuilder::default()
    }

    /// Starts the orchestrator.
    ///
    /// Loads (or writes) the configuration, hands every service its section,
    /// starts discovery, health monitoring and auto-scaling in parallel,
    /// seeds routing with the discovered nodes and starts watching the
    /// configuration file. Starting a running orchestrator does nothing.
    ///
    /// # Errors
    /// `CONFIGURATION_ERROR` wrapping the cause if anything fails to start;
    /// every service started so far is stopped again.
    ///
    /// # Example
    /// ```no_run
    /// # use helmsman_orchestrator::GlobalOrchestrator;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let orchestrator = GlobalOrchestrator::builder()
    ///     .config_path("orchestrator.json")
    ///     .build()?;
    /// orchestrator.start().await?;
    /// let topology = orchestrator.get_global_topology().await;
    /// println!("{} nodes", topology.total_nodes());
    /// orchestrator.stop().await;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut run = self.run.lock().await;
        if run.is_some() {
            return Ok(());
        }

        // Subscribe first so events of the first discovery cycle are seen
        let events = self.internal.subscribe();
        let config_changes = self.config.subscribe();

        if let Err(e) = self.start_services().await {
            error!("Orchestrator failed to start: {}", e);
            self.stop_services().await;
            return Err(e.wrap(ErrorCode::ConfigurationError, "failed to start orchestrator"));
        }

        let nodes = self.discovery.get_discovered_nodes().await;
        self.routing.sync_nodes(&nodes).await;

        let pumps = vec![
            spawn_event_pump(Arc::downgrade(self), events),
            spawn_config_pump(Arc::downgrade(self), config_changes),
        ];
        *run = Some(RunState {
            started_at: Instant::now(),
            pumps,
        });
        drop(run);

        self.refresh_topology().await;
        let orchestrator_id = self.config.get_config().orchestrator_id.clone();
        info!("Orchestrator {} started with {} nodes", orchestrator_id, nodes.len());
        self.external.emit(OrchestratorEvent::Started { orchestrator_id });
        Ok(())
    }

    async fn start_services(self: &Arc<Self>) -> Result<()> {
        let config = self.config.initialize().await?;
        self.apply_config(&config).await?;

        let (discovery, health, scaling) = tokio::join!(
            self.discovery.start(),
            self.health.start(),
            self.scaling.start()
        );
        discovery?;
        health?;
        scaling?;

        self.config.start_watching()
    }

    async fn stop_services(&self) {
        self.config.stop_watching();
        tokio::join!(self.discovery.stop(), self.health.stop(), self.scaling.stop());
    }

    /// Stops all services and the configuration watcher.
    ///
    /// Probes in flight finish or time out on their own. Stopping a stopped
    /// orchestrator does nothing.
    pub async fn stop(&self) {
        let Some(run) = self.run.lock().await.take() else {
            return;
        };
        for pump in run.pumps {
            pump.abort();
        }
        self.stop_services().await;
        info!("Orchestrator stopped");
        self.external.emit(OrchestratorEvent::Stopped);
    }

    pub async fn is_running(&self) -> bool {
        self.run.lock().await.is_some()
    }

    /// Hands every service its section of `config`.
    async fn apply_config(self: &Arc<Self>, config: &OrchestratorConfig) -> Result<()> {
        self.discovery
            .update_config(config.discovery.clone(), &config.orchestrator_id)
            .await?;
        self.health
            .update_config(config.health_monitoring.clone())
            .await?;
        self.routing.update_config(config.routing.clone());
        self.scaling.update_config(config.scaling.clone()).await?;
        self.failover.update_config(config.failover.clone()).await?;
        Ok(())
    }

    /// Receiver of every orchestrator event.
    ///
    /// Metrics samples stay internal; everything else the services emit is
    /// forwarded.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.external.subscribe()
    }

    async fn handle_event(self: &Arc<Self>, event: OrchestratorEvent) {
        match &event {
            OrchestratorEvent::MetricsCollected { node_id, metrics } => {
                self.routing.update_node_load(node_id, metrics.clone()).await;
                return;
            }
            OrchestratorEvent::NodeDiscovered { node } => {
                // Skip nodes already gone again by the time the event is seen
                if self.discovery.get_node_by_id(&node.node_id).await.is_some() {
                    self.routing.add_node(node).await;
                }
                self.refresh_topology().await;
            }
            OrchestratorEvent::NodeLost { node_id, .. }
            | OrchestratorEvent::NodeUnregistered { node_id } => {
                self.forget_node(node_id).await;
                self.refresh_topology().await;
            }
            OrchestratorEvent::NodeHealthy { node_id, previous } => {
                self.routing.set_node_health(node_id, HealthStatus::Healthy).await;
                self.failover.update_node_health(node_id, true);
                let auto_recovery = self.config.get_config().failover.auto_recovery;
                if *previous == HealthStatus::Unhealthy && auto_recovery {
                    let this = self.clone();
                    let node_id = node_id.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.recover(&node_id).await {
                            warn!("Automatic recovery of {} failed: {}", node_id, e);
                        }
                    });
                }
            }
            OrchestratorEvent::NodeUnhealthy { node_id, reason, .. } => {
                // Failover may take up to its timeout; keep the pump moving
                let this = self.clone();
                let node_id = node_id.clone();
                let reason = reason.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.fail_node(&node_id, &reason).await {
                        warn!("Failure handling of {} failed: {}", node_id, e);
                    }
                });
            }
            OrchestratorEvent::ScalingExecuted { .. } | OrchestratorEvent::FailoverCompleted { .. } => {
                self.refresh_topology().await;
            }
            _ => {}
        }
        self.external.emit(event);
    }

    async fn forget_node(&self, node_id: &str) {
        self.routing.remove_node(node_id).await;
        self.health.forget_node(node_id).await;
        self.metrics.forget_node(node_id);
    }

    /// Rebuilds routing from the node table after events were missed.
    async fn resync(&self) {
        let nodes = self.discovery.get_discovered_nodes().await;
        self.routing.sync_nodes(&nodes).await;
        self.refresh_topology().await;
    }

    /// Recomputes the topology and announces it.
    pub async fn refresh_topology(&self) -> GlobalTopology {
        let config = self.config.get_config();
        let known_federations: Vec<String> = config
            .federation
            .federation_managers
            .iter()
            .map(|m| m.federation_id.clone())
            .collect();

        let topology = build_topology(TopologyInputs {
            nodes: self.discovery.get_discovered_nodes().await,
            known_federations: &known_federations,
            routing_table: self.routing.get_routing_table().await,
            scaling: &config.scaling,
            failover_groups: self.failover.get_failover_groups().await,
            now: now_millis(),
        });

        *self.topology.write().await = topology.clone();
        self.external.emit(OrchestratorEvent::TopologyUpdated {
            last_updated: topology.last_updated,
        });
        topology
    }

    pub async fn get_global_topology(&self) -> GlobalTopology {
        self.topology.read().await.clone()
    }

    /// Picks a target node for `message`.
    ///
    /// # Errors
    /// `ROUTING_FAILED` if message routing is disabled, the message would
    /// cross federations while that is disabled, or no healthy candidate
    /// exists
    pub async fn route_message(&self, message: &OrchestratorMessage) -> Result<RoutingDecision> {
        let federation = self.config.get_config().federation.clone();
        if !federation.message_routing_enabled {
            return Err(facade_error("routing")(OrchestratorError::RoutingFailed(
                "message routing is disabled".to_string(),
            )));
        }

        if !federation.cross_federation_communication {
            if let (Some(source), Some(target)) = (&message.source_node_id, &message.target_federation_id) {
                let source = self.discovery.get_node_by_id(source).await;
                if source.is_some_and(|s| &s.federation_id != target) {
                    return Err(facade_error("routing")(OrchestratorError::RoutingFailed(
                        "cross-federation communication is disabled".to_string(),
                    )));
                }
            }
        }

        let decision = self.routing.route_message(message).await;
        match &decision {
            Ok(_) => self.metrics.record_service_success(ServiceKind::Routing),
            Err(e) => debug!("Routing of {} failed: {}", message.id, e),
        }
        decision.map_err(facade_error("routing"))
    }

    /// Reports the outcome of delivering a routed message.
    ///
    /// Feeds the reliability term of adaptive routing.
    ///
    /// # Returns
    /// The node's recent delivery success rate, or `None` for a node
    /// routing does not know
    pub async fn record_delivery(&self, node_id: &str, success: bool) -> Option<f64> {
        self.routing.record_outcome(node_id, success).await
    }

    /// Marks a node failed and fails over the groups it is primary of.
    ///
    /// The node stops receiving traffic immediately; its resolved health
    /// becomes `Unhealthy` until probes or [`recover_node`](Self::recover_node)
    /// bring it back.
    ///
    /// # Returns
    /// The failover events this failure produced
    pub async fn handle_node_failure(&self, node_id: &str, reason: &str) -> Result<Vec<FailoverEvent>> {
        self.health
            .update_node_health(node_id, HealthStatus::Unhealthy)
            .await;
        self.fail_node(node_id, reason)
            .await
            .map_err(facade_error("failure handling"))
    }

    async fn fail_node(&self, node_id: &str, reason: &str) -> Result<Vec<FailoverEvent>> {
        warn!("Node {} failed: {}", node_id, reason);
        self.routing.set_node_health(node_id, HealthStatus::Unhealthy).await;
        self.external.emit(OrchestratorEvent::NodeFailed {
            node_id: node_id.to_string(),
            reason: reason.to_string(),
        });

        let result = self.failover.handle_node_failure(node_id, reason).await;
        match &result {
            Ok(_) => self.metrics.record_service_success(ServiceKind::Failover),
            Err(e) => self
                .metrics
                .record_service_failure(ServiceKind::Failover, &e.to_string()),
        }
        self.refresh_topology().await;
        result
    }

    /// Marks a node healthy again and applies the failback policy.
    pub async fn recover_node(&self, node_id: &str) -> Result<Vec<FailoverEvent>> {
        self.health
            .update_node_health(node_id, HealthStatus::Healthy)
            .await;
        self.recover(node_id).await.map_err(facade_error("recovery"))
    }

    async fn recover(&self, node_id: &str) -> Result<Vec<FailoverEvent>> {
        info!("Node {} recovered", node_id);
        self.routing.set_node_health(node_id, HealthStatus::Healthy).await;
        let result = self.failover.recover_node(node_id).await;
        self.external.emit(OrchestratorEvent::NodeRecovered {
            node_id: node_id.to_string(),
        });
        self.refresh_topology().await;
        result
    }

    /// Registers a node without the registry.
    pub async fn register_node(&self, node: NodeInfo) -> Result<NodeInfo> {
        let node = self
            .discovery
            .register_node(node)
            .await
            .map_err(facade_error("node registration"))?;
        self.routing.add_node(&node).await;
        self.refresh_topology().await;
        Ok(node)
    }

    pub async fn unregister_node(&self, node_id: &str) -> Option<NodeInfo> {
        let node = self.discovery.unregister_node(node_id).await?;
        self.forget_node(node_id).await;
        self.refresh_topology().await;
        Some(node)
    }

    pub async fn get_discovered_nodes(&self) -> Vec<NodeInfo> {
        self.discovery.get_discovered_nodes().await
    }

    /// Executes a scaling action on operator request.
    ///
    /// # Returns
    /// The executed decision, or `None` if the first target is cooling down
    pub async fn manual_scaling(
        &self,
        action: ScalingAction,
        target_nodes: Vec<String>,
        reason: &str,
    ) -> Result<Option<ScalingDecision>> {
        let decision = self
            .scaling
            .manual_scale(action, target_nodes, reason)
            .await
            .map_err(facade_error("manual scaling"))?;
        self.refresh_topology().await;
        Ok(decision)
    }

    pub async fn manual_failover(
        &self,
        group_id: &str,
        target_node_id: &str,
        reason: &str,
    ) -> Result<FailoverEvent> {
        let event = self
            .failover
            .manual_failover(group_id, target_node_id, reason)
            .await
            .map_err(facade_error("manual failover"))?;
        self.refresh_topology().await;
        Ok(event)
    }

    pub async fn create_failover_group(
        &self,
        primary_node_id: &str,
        backup_node_ids: Vec<String>,
        strategy: FailoverStrategy,
    ) -> Result<FailoverGroup> {
        let group = self
            .failover
            .create_failover_group(primary_node_id, backup_node_ids, strategy)
            .await
            .map_err(facade_error("failover group creation"))?;
        self.refresh_topology().await;
        Ok(group)
    }

    /// Validates, persists and applies a partial configuration update.
    ///
    /// Services see the new configuration before this returns.
    pub async fn update_configuration(
        self: &Arc<Self>,
        patch: &OrchestratorConfigPatch,
    ) -> Result<Arc<OrchestratorConfig>> {
        let config = self
            .config
            .update_config(patch)
            .await
            .map_err(facade_error("configuration update"))?;
        self.apply_config(&config)
            .await
            .map_err(facade_error("configuration update"))?;
        Ok(config)
    }

    pub fn get_configuration(&self) -> Arc<OrchestratorConfig> {
        self.config.get_config()
    }

    pub fn get_configuration_summary(&self) -> ConfigSummary {
        self.config.get_config_summary()
    }

    /// Adds or replaces the manager of a federation.
    pub async fn register_federation_manager(
        self: &Arc<Self>,
        federation_id: &str,
        endpoint: &str,
        auth: Option<FederationAuth>,
    ) -> Result<()> {
        if federation_id.is_empty() {
            return Err(OrchestratorError::FederationIntegration(
                "federation id must not be empty".to_string(),
            ));
        }
        let manager = FederationManagerConfig {
            federation_id: federation_id.to_string(),
            endpoint: endpoint.to_string(),
            auth,
        };
        self.config
            .update_with(|config| {
                let managers = &mut config.federation.federation_managers;
                managers.retain(|m| m.federation_id != manager.federation_id);
                managers.push(manager);
                Ok(())
            })
            .await
            .map_err(|e| {
                e.wrap(
                    ErrorCode::FederationIntegrationError,
                    format!("registering federation manager {} failed", federation_id),
                )
            })?;
        info!("Registered federation manager {} at {}", federation_id, endpoint);
        self.refresh_topology().await;
        Ok(())
    }

    pub async fn unregister_federation_manager(self: &Arc<Self>, federation_id: &str) -> Result<()> {
        self.config
            .update_with(|config| {
                let managers = &mut config.federation.federation_managers;
                let before = managers.len();
                managers.retain(|m| m.federation_id != federation_id);
                if managers.len() == before {
                    return Err(OrchestratorError::FederationIntegration(format!(
                        "unknown federation manager {}",
                        federation_id
                    )));
                }
                Ok(())
            })
            .await
            .map_err(|e| {
                e.wrap(
                    ErrorCode::FederationIntegrationError,
                    format!("unregistering federation manager {} failed", federation_id),
                )
            })?;
        info!("Unregistered federation manager {}", federation_id);
        self.refresh_topology().await;
        Ok(())
    }

    fn uptime_ms(run: &Option<RunState>) -> u64 {
        run.as_ref()
            .map(|r| r.started_at.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    pub async fn get_global_metrics(&self) -> GlobalMetrics {
        let uptime_ms = Self::uptime_ms(&*self.run.lock().await);
        let summary = self.health.get_health_summary().await;
        let snapshot = self.metrics.snapshot();
        let topology = self.topology.read().await;

        GlobalMetrics {
            orchestrator_id: self.config.get_config().orchestrator_id.clone(),
            timestamp: now_millis(),
            uptime_ms,
            total_federations: topology.federations.len(),
            total_nodes: summary.total,
            healthy_nodes: summary.healthy,
            degraded_nodes: summary.degraded,
            unhealthy_nodes: summary.unhealthy,
            unknown_nodes: summary.unknown,
            overall_health: summary.overall,
            routing_decisions: snapshot.routing_decisions,
            routing_failures: snapshot.routing_failures,
            routing_error_rate: snapshot.routing_error_rate(),
            cross_federation_messages: snapshot.cross_federation_messages,
            scaling_events: snapshot.scaling_events,
            failover_events: snapshot.failover_events,
            active_failovers: self.failover.get_active_failovers().len(),
            routing_latency: snapshot.routing_latency,
            average_load: self.health.calculate_average_load(None).await,
        }
    }

    pub async fn get_service_health(&self) -> ServiceHealthReport {
        let (running, uptime_ms) = {
            let run = self.run.lock().await;
            (run.is_some(), Self::uptime_ms(&run))
        };

        let mut services = Vec::with_capacity(ServiceKind::COUNT);
        for kind in ServiceKind::ALL {
            let service_running = match kind {
                ServiceKind::Discovery => self.discovery.is_running().await,
                ServiceKind::HealthMonitor => self.health.is_running().await,
                ServiceKind::AutoScaling => self.scaling.is_running().await,
                ServiceKind::Configuration | ServiceKind::Routing | ServiceKind::Failover => running,
            };
            services.push(self.metrics.service_health(kind, service_running));
        }

        ServiceHealthReport {
            orchestrator_id: self.config.get_config().orchestrator_id.clone(),
            running,
            uptime_ms,
            services,
            timestamp: now_millis(),
        }
    }

    /// True iff the orchestrator runs and none of its services is unhealthy.
    pub async fn perform_health_check(&self) -> bool {
        self.get_service_health().await.is_operational()
    }

    pub async fn server_info(&self) -> ServerInfo {
        let uptime_ms = Self::uptime_ms(&*self.run.lock().await);
        ServerInfo::new(self.config.get_config().orchestrator_id.clone(), uptime_ms)
    }

    /// Direct access to the services, for embedding and tests.
    pub fn discovery(&self) -> &Arc<NodeDiscoveryService> {
        &self.discovery
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitoringService> {
        &self.health
    }

    pub fn routing(&self) -> &Arc<IntelligentRoutingService> {
        &self.routing
    }

    pub fn scaling(&self) -> &Arc<AutoScalingService> {
        &self.scaling
    }

    pub fn failover(&self) -> &Arc<FailoverService> {
        &self.failover
    }

    pub fn configuration(&self) -> &Arc<ConfigurationManager> {
        &self.config
    }
}

/// Forwards service events into the orchestrator until it is dropped.
fn spawn_event_pump(
    weak: Weak<GlobalOrchestrator>,
    mut events: broadcast::Receiver<OrchestratorEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = events.recv().await;
            let Some(this) = weak.upgrade() else {
                break;
            };
            match received {
                Ok(event) => this.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event pump skipped {} events, resynchronizing", skipped);
                    this.resync().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Propagates configuration changes, including external file edits.
fn spawn_config_pump(
    weak: Weak<GlobalOrchestrator>,
    mut changes: tokio::sync::watch::Receiver<Arc<OrchestratorConfig>>,
) -> JoinHandle<()> {
    changes.borrow_and_update();
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let config = changes.borrow_and_update().clone();
            let Some(this) = weak.upgrade() else {
                break;
            };
            match this.apply_config(&config).await {
                Ok(()) => this.metrics.record_service_success(ServiceKind::Configuration),
                Err(e) => {
                    error!("Applying configuration failed: {}", e);
                    this.metrics
                        .record_service_failure(ServiceKind::Configuration, &e.to_string());
                }
            }
            this.external.emit(OrchestratorEvent::ConfigUpdated);
            this.refresh_topology().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{load, FakeTransport};
    use std::time::Duration;

    fn orchestrator(transport: Arc<FakeTransport>) -> Arc<GlobalOrchestrator> {
        GlobalOrchestrator::builder()
            .transport(transport)
            .build()
            .unwrap()
    }

    fn node(id: &str, federation: &str) -> NodeInfo {
        NodeInfo::new(id, federation, "10.0.0.1", 8080)
    }

    async fn next_matching(
        rx: &mut broadcast::Receiver<OrchestratorEvent>,
        name: &str,
    ) -> OrchestratorEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if event.name() == name {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let orchestrator = orchestrator(Arc::new(FakeTransport::default()));
        let mut rx = orchestrator.subscribe();

        orchestrator.start().await.unwrap();
        orchestrator.start().await.unwrap();
        assert!(orchestrator.is_running().await);
        assert!(orchestrator.perform_health_check().await);
        next_matching(&mut rx, "started").await;

        orchestrator.stop().await;
        orchestrator.stop().await;
        assert!(!orchestrator.is_running().await);
        assert!(!orchestrator.perform_health_check().await);
        next_matching(&mut rx, "stopped").await;
    }

    #[tokio::test]
    async fn test_start_failure_leaves_nothing_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.json");
        std::fs::write(&path, r#"{"scaling": {"minNodes": 10, "maxNodes": 5}}"#).unwrap();

        let orchestrator = GlobalOrchestrator::builder()
            .config_path(&path)
            .transport(Arc::new(FakeTransport::default()))
            .build()
            .unwrap();
        let err = orchestrator.start().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
        assert!(!orchestrator.is_running().await);
        assert!(!orchestrator.discovery().is_running().await);
        assert!(!orchestrator.health_monitor().is_running().await);
        assert!(!orchestrator.scaling().is_running().await);
    }

    #[tokio::test]
    async fn test_registered_nodes_are_routable() {
        let orchestrator = orchestrator(Arc::new(FakeTransport::default()));
        orchestrator.start().await.unwrap();

        orchestrator.register_node(node("n1", "eu")).await.unwrap();
        let decision = orchestrator
            .route_message(&OrchestratorMessage::new("task", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(decision.target_node_id, "n1");

        let topology = orchestrator.get_global_topology().await;
        assert_eq!(topology.total_nodes(), 1);
        assert_eq!(topology.routing_table["eu"], vec!["n1"]);

        orchestrator.unregister_node("n1").await.unwrap();
        let err = orchestrator
            .route_message(&OrchestratorMessage::new("task", serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RoutingFailed);
        assert_eq!(err.cause_code(), Some(ErrorCode::RoutingFailed));
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_node_failure_fails_over_and_recovers() {
        let orchestrator = orchestrator(Arc::new(FakeTransport::default()));
        orchestrator.start().await.unwrap();
        let mut rx = orchestrator.subscribe();

        for id in ["a", "b"] {
            orchestrator.register_node(node(id, "eu")).await.unwrap();
        }
        let group = orchestrator
            .create_failover_group("a", vec!["b".to_string()], FailoverStrategy::Automatic)
            .await
            .unwrap();

        let events = orchestrator.handle_node_failure("a", "operator report").await.unwrap();
        assert_eq!(events[0].backup_node_id, "b");
        next_matching(&mut rx, "nodeFailed").await;

        // the failed node gets no traffic
        for _ in 0..3 {
            let decision = orchestrator
                .route_message(&OrchestratorMessage::new("task", serde_json::json!({})))
                .await
                .unwrap();
            assert_eq!(decision.target_node_id, "b");
        }

        let topology = orchestrator.get_global_topology().await;
        let current = topology
            .failover_groups
            .iter()
            .find(|g| g.group_id == group.group_id)
            .unwrap();
        assert_eq!(current.primary_node_id, "b");

        orchestrator.recover_node("a").await.unwrap();
        next_matching(&mut rx, "nodeRecovered").await;
        assert_eq!(
            orchestrator.health_monitor().get_node_health_status("a").await,
            Some(HealthStatus::Healthy)
        );
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_unhealthy_probes_trigger_failover() {
        let transport = Arc::new(FakeTransport::default());
        let orchestrator = orchestrator(transport.clone());
        orchestrator.start().await.unwrap();
        let mut rx = orchestrator.subscribe();

        for id in ["a", "b"] {
            orchestrator.register_node(node(id, "eu")).await.unwrap();
        }
        orchestrator
            .create_failover_group("a", vec!["b".to_string()], FailoverStrategy::Automatic)
            .await
            .unwrap();

        transport.set_health("a", false);
        for _ in 0..3 {
            orchestrator.health_monitor().check_all_nodes().await;
        }

        next_matching(&mut rx, "nodeUnhealthy").await;
        match next_matching(&mut rx, "failoverCompleted").await {
            OrchestratorEvent::FailoverCompleted { event, .. } => {
                assert_eq!(event.primary_node_id, "a");
                assert_eq!(event.backup_node_id, "b");
            }
            other => panic!("unexpected event {:?}", other),
        }
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_metrics_samples_reach_routing_but_not_subscribers() {
        let transport = Arc::new(FakeTransport::default());
        transport.set_metrics("n1", load(42.0, 10.0));
        let orchestrator = orchestrator(transport);
        orchestrator.start().await.unwrap();
        orchestrator.register_node(node("n1", "eu")).await.unwrap();
        let mut rx = orchestrator.subscribe();

        orchestrator.health_monitor().collect_all_metrics().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let entry = orchestrator.routing().get_route_entry("n1").await.unwrap();
                if entry.load.is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        while let Ok(event) = rx.try_recv() {
            assert_ne!(event.name(), "metricsCollected");
        }

        let metrics = orchestrator.get_global_metrics().await;
        assert_eq!(metrics.total_nodes, 1);
        assert_eq!(metrics.average_load.unwrap().cpu_usage, 42.0);
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_configuration_update_propagates() {
        let orchestrator = orchestrator(Arc::new(FakeTransport::default()));
        orchestrator.start().await.unwrap();
        let mut rx = orchestrator.subscribe();

        let patch: OrchestratorConfigPatch =
            serde_json::from_value(serde_json::json!({"federation": {"messageRoutingEnabled": false}}))
                .unwrap();
        orchestrator.update_configuration(&patch).await.unwrap();
        next_matching(&mut rx, "configUpdated").await;

        orchestrator.register_node(node("n1", "eu")).await.unwrap();
        let err = orchestrator
            .route_message(&OrchestratorMessage::new("task", serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RoutingFailed);

        let invalid: OrchestratorConfigPatch =
            serde_json::from_value(serde_json::json!({"scaling": {"minNodes": 10, "maxNodes": 5}}))
                .unwrap();
        let err = orchestrator.update_configuration(&invalid).await.unwrap_err();
        assert_eq!(err.cause_code(), Some(ErrorCode::ConfigurationError));
        assert_eq!(orchestrator.get_configuration().scaling.max_nodes, 50);
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_federation_managers() {
        let orchestrator = orchestrator(Arc::new(FakeTransport::default()));
        orchestrator.start().await.unwrap();

        orchestrator
            .register_federation_manager("eu", "https://eu.example.com", None)
            .await
            .unwrap();
        orchestrator
            .register_federation_manager("eu", "https://eu2.example.com", None)
            .await
            .unwrap();
        let managers = orchestrator.get_configuration().federation.federation_managers.clone();
        assert_eq!(managers.len(), 1);
        assert_eq!(managers[0].endpoint, "https://eu2.example.com");

        let err = orchestrator
            .register_federation_manager("us", "ftp://us.example.com", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FederationIntegrationError);

        let topology = orchestrator.get_global_topology().await;
        assert_eq!(topology.federations[0].federation_id, "eu");

        orchestrator.unregister_federation_manager("eu").await.unwrap();
        let err = orchestrator.unregister_federation_manager("eu").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::FederationIntegrationError);
        assert_eq!(err.message(), "unregistering federation manager eu failed");
        assert_eq!(err.cause_code(), Some(ErrorCode::FederationIntegrationError));
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_service_health_report() {
        let orchestrator = orchestrator(Arc::new(FakeTransport::default()));
        let report = orchestrator.get_service_health().await;
        assert!(!report.running);
        assert_eq!(report.services.len(), ServiceKind::COUNT);

        orchestrator.start().await.unwrap();
        let report = orchestrator.get_service_health().await;
        assert!(report.is_operational());
        assert_eq!(report.orchestrator_id, "global-orchestrator");
        orchestrator.stop().await;
    }
}
