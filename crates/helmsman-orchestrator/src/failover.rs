use async_trait::async_trait;
use helmsman_common::time::now_millis;
use helmsman_common::{ErrorCode, OrchestratorError, Result};
use helmsman_metrics::OrchestratorMetricsCollector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{FailbackPolicy, FailoverConfig};
use crate::events::{EventBus, OrchestratorEvent};

/// Group seeded from `failover.primaryNodeId` and `failover.backupNodes`.
pub const DEFAULT_GROUP_ID: &str = "default";

const HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStrategy {
    #[default]
    Automatic,
    Manual,
    LoadBalanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverEventType {
    Automatic,
    Manual,
    Recovery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverGroup {
    pub group_id: String,
    pub primary_node_id: String,
    pub backup_node_ids: Vec<String>,
    pub failover_strategy: FailoverStrategy,
    /// Primary the group was registered with, target of failback
    pub preferred_primary: String,
}

impl FailoverGroup {
    pub fn new(
        group_id: impl Into<String>,
        primary_node_id: impl Into<String>,
        backup_node_ids: Vec<String>,
        failover_strategy: FailoverStrategy,
    ) -> Self {
        let primary_node_id = primary_node_id.into();
        Self {
            group_id: group_id.into(),
            preferred_primary: primary_node_id.clone(),
            primary_node_id,
            backup_node_ids,
            failover_strategy,
        }
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.primary_node_id == node_id || self.backup_node_ids.iter().any(|b| b == node_id)
    }

    fn validate(&self) -> Result<()> {
        if self.group_id.is_empty() || self.primary_node_id.is_empty() {
            return Err(OrchestratorError::FailoverFailed(
                "failover group needs an id and a primary node".to_string(),
            ));
        }
        if self.backup_node_ids.contains(&self.primary_node_id) {
            return Err(OrchestratorError::FailoverFailed(format!(
                "primary {} is also listed as a backup of {}",
                self.primary_node_id, self.group_id
            )));
        }
        Ok(())
    }

    /// Makes `node_id` the primary; the former primary becomes the last backup.
    fn promote(&mut self, node_id: &str) {
        let former = std::mem::replace(&mut self.primary_node_id, node_id.to_string());
        self.backup_node_ids.retain(|b| b != node_id);
        if !self.backup_node_ids.contains(&former) {
            self.backup_node_ids.push(former);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverEvent {
    #[serde(rename = "type")]
    pub event_type: FailoverEventType,
    pub primary_node_id: String,
    pub backup_node_id: String,
    pub reason: String,
    pub timestamp: u64,
    pub recovery_time_ms: Option<u64>,
}

/// Moves a group's workload from one node to another.
#[async_trait]
pub trait FailoverExecutor: Send + Sync {
    async fn execute(&self, group: &FailoverGroup, from: &str, to: &str) -> Result<()>;
}

/// Executor with nothing to migrate; the switch is the group state update.
#[derive(Debug, Default)]
pub struct StateSwitchExecutor;

#[async_trait]
impl FailoverExecutor for StateSwitchExecutor {
    async fn execute(&self, group: &FailoverGroup, from: &str, to: &str) -> Result<()> {
        debug!("Switching {} from {} to {}", group.group_id, from, to);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverStats {
    pub enabled: bool,
    pub total_groups: usize,
    pub active_failovers: usize,
    pub completed_failovers: u64,
    pub failed_failovers: u64,
    pub average_recovery_time_ms: f64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    total_recovery_ms: u64,
}

/// Removes a group from the active set when dropped.
struct ActiveFailover<'a> {
    active: &'a StdMutex<HashMap<String, FailoverEvent>>,
    group_id: String,
}

impl Drop for ActiveFailover<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.group_id);
    }
}

/// Primary/backup failover over registered groups.
///
/// A group has at most one failover in progress; triggers arriving while
/// one runs are ignored.
pub struct FailoverService {
    config: StdRwLock<FailoverConfig>,
    groups: RwLock<BTreeMap<String, FailoverGroup>>,
    active: StdMutex<HashMap<String, FailoverEvent>>,
    node_health: StdRwLock<HashMap<String, bool>>,
    history: StdMutex<VecDeque<FailoverEvent>>,
    counters: StdMutex<Counters>,
    executor: Arc<dyn FailoverExecutor>,
    events: EventBus,
    metrics: OrchestratorMetricsCollector,
}

impl FailoverService {
    pub fn new(
        config: FailoverConfig,
        executor: Arc<dyn FailoverExecutor>,
        events: EventBus,
        metrics: OrchestratorMetricsCollector,
    ) -> Self {
        Self {
            config: StdRwLock::new(config),
            groups: RwLock::new(BTreeMap::new()),
            active: StdMutex::new(HashMap::new()),
            node_health: StdRwLock::new(HashMap::new()),
            history: StdMutex::new(VecDeque::new()),
            counters: StdMutex::new(Counters::default()),
            executor,
            events,
            metrics,
        }
    }

    fn config(&self) -> FailoverConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Applies a new configuration and re-seeds the `default` group from it.
    pub async fn update_config(&self, config: FailoverConfig) -> Result<()> {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        self.seed_default_group().await
    }

    /// Registers the `default` group when a primary is configured.
    ///
    /// An existing `default` group keeps its current primary if the
    /// configured members did not change.
    pub async fn seed_default_group(&self) -> Result<()> {
        let config = self.config();
        let Some(primary) = config.primary_node_id.filter(|p| !p.is_empty()) else {
            return Ok(());
        };

        let seeded = FailoverGroup::new(
            DEFAULT_GROUP_ID,
            primary,
            config.backup_nodes,
            FailoverStrategy::Automatic,
        );
        if let Some(existing) = self.groups.read().await.get(DEFAULT_GROUP_ID) {
            let mut configured: Vec<&String> = seeded.backup_node_ids.iter().collect();
            configured.push(&seeded.preferred_primary);
            if existing.preferred_primary == seeded.preferred_primary
                && configured.iter().all(|id| existing.contains(id))
            {
                return Ok(());
            }
        }
        self.register_failover_group(seeded).await
    }

    /// Creates a group with a generated id.
    pub async fn create_failover_group(
        &self,
        primary_node_id: &str,
        backup_node_ids: Vec<String>,
        strategy: FailoverStrategy,
    ) -> Result<FailoverGroup> {
        let group = FailoverGroup::new(
            uuid::Uuid::new_v4().to_string(),
            primary_node_id,
            backup_node_ids,
            strategy,
        );
        self.register_failover_group(group.clone()).await?;
        Ok(group)
    }

    /// Registers or replaces a group.
    pub async fn register_failover_group(&self, mut group: FailoverGroup) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        group.backup_node_ids.retain(|b| seen.insert(b.clone()));
        group.validate()?;

        info!(
            "Registered failover group {} (primary {}, backups {:?})",
            group.group_id, group.primary_node_id, group.backup_node_ids
        );
        self.groups.write().await.insert(group.group_id.clone(), group);
        Ok(())
    }

    pub async fn remove_failover_group(&self, group_id: &str) -> Option<FailoverGroup> {
        self.groups.write().await.remove(group_id)
    }

    pub async fn get_failover_groups(&self) -> Vec<FailoverGroup> {
        self.groups.read().await.values().cloned().collect()
    }

    pub async fn get_failover_group(&self, group_id: &str) -> Option<FailoverGroup> {
        self.groups.read().await.get(group_id).cloned()
    }

    /// Failovers in progress, by group.
    pub fn get_active_failovers(&self) -> BTreeMap<String, FailoverEvent> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(group, event)| (group.clone(), event.clone()))
            .collect()
    }

    /// Up to `limit` most recent failover events, newest first.
    pub fn get_failover_history(&self, limit: usize) -> Vec<FailoverEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Tracked health of a node, `None` if never reported.
    pub fn get_node_health_status(&self, node_id: &str) -> Option<bool> {
        self.node_health
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .copied()
    }

    pub fn update_node_health(&self, node_id: &str, healthy: bool) {
        self.node_health
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id.to_string(), healthy);
    }

    /// Claims the in-flight slot of a group.
    ///
    /// # Returns
    /// `None` if the group already has a failover in progress
    fn begin(&self, group_id: &str, pending: FailoverEvent) -> Option<ActiveFailover<'_>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(group_id) {
            return None;
        }
        active.insert(group_id.to_string(), pending);
        Some(ActiveFailover {
            active: &self.active,
            group_id: group_id.to_string(),
        })
    }

    /// Fails over every group whose primary is `node_id`.
    ///
    /// The node is marked unhealthy for backup selection. Groups where it
    /// is only a backup keep running unchanged. Groups with a failover in
    /// progress are skipped.
    ///
    /// # Returns
    /// The completed failover events
    ///
    /// # Errors
    /// `FAILOVER_FAILED` if some group had no eligible backup or its switch
    /// failed; the remaining groups are still processed
    pub async fn handle_node_failure(&self, node_id: &str, reason: &str) -> Result<Vec<FailoverEvent>> {
        self.update_node_health(node_id, false);

        let config = self.config();
        if !config.enabled {
            debug!("Failover disabled, ignoring failure of {}", node_id);
            return Ok(Vec::new());
        }

        let affected: Vec<String> = self
            .groups
            .read()
            .await
            .values()
            .filter(|g| g.contains(node_id))
            .map(|g| g.group_id.clone())
            .collect();

        let mut completed = Vec::new();
        let mut first_error = None;
        for group_id in affected {
            let now = now_millis();
            let pending = FailoverEvent {
                event_type: FailoverEventType::Automatic,
                primary_node_id: node_id.to_string(),
                backup_node_id: String::new(),
                reason: reason.to_string(),
                timestamp: now,
                recovery_time_ms: None,
            };
            let Some(_active) = self.begin(&group_id, pending) else {
                debug!("Failover of {} already in progress", group_id);
                continue;
            };

            // Re-read under the in-flight slot; a finished failover may have moved the primary
            let Some(group) = self.get_failover_group(&group_id).await else {
                continue;
            };
            if group.primary_node_id != node_id {
                debug!("{} is a backup of {}, no switch needed", node_id, group_id);
                continue;
            }

            let result = match self.select_backup(&group, node_id) {
                Some(backup) => {
                    let event_type = if group.failover_strategy == FailoverStrategy::Automatic
                        && config.auto_recovery
                    {
                        FailoverEventType::Automatic
                    } else {
                        FailoverEventType::Manual
                    };
                    let promote = event_type == FailoverEventType::Automatic;
                    self.switch(&group, node_id, &backup, event_type, reason, promote, &config)
                        .await
                }
                None => Err(OrchestratorError::FailoverFailed(format!(
                    "no healthy backup for {} in group {}",
                    node_id, group_id
                ))),
            };

            match result {
                Ok(event) => completed.push(event),
                Err(e) => {
                    self.counters().failed += 1;
                    error!("Failover of group {} failed: {}", group_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(completed),
        }
    }

    /// First backup in order not known to be unhealthy.
    fn select_backup(&self, group: &FailoverGroup, failed: &str) -> Option<String> {
        let health = self.node_health.read().unwrap_or_else(PoisonError::into_inner);
        group
            .backup_node_ids
            .iter()
            .find(|b| *b != failed && health.get(*b) != Some(&false))
            .cloned()
    }

    /// Executes one switch of `group` from `from` to `to`.
    ///
    /// The caller holds the group's in-flight slot. With `promote`, `to`
    /// becomes the group's primary once the switch succeeded.
    #[allow(clippy::too_many_arguments)]
    async fn switch(
        &self,
        group: &FailoverGroup,
        from: &str,
        to: &str,
        event_type: FailoverEventType,
        reason: &str,
        promote: bool,
        config: &FailoverConfig,
    ) -> Result<FailoverEvent> {
        let started = Instant::now();
        info!(
            "Failing over group {} from {} to {} ({})",
            group.group_id, from, to, reason
        );

        match tokio::time::timeout(config.timeout(), self.executor.execute(group, from, to)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(e.wrap(
                    ErrorCode::FailoverFailed,
                    format!("switching {} to {} failed", group.group_id, to),
                ))
            }
            Err(_) => {
                return Err(OrchestratorError::FailoverFailed(format!(
                    "switching {} to {} timed out after {}ms",
                    group.group_id, to, config.failover_timeout
                )))
            }
        }

        if promote {
            if let Some(current) = self.groups.write().await.get_mut(&group.group_id) {
                current.promote(to);
            }
        }

        let event = FailoverEvent {
            event_type,
            primary_node_id: from.to_string(),
            backup_node_id: to.to_string(),
            reason: reason.to_string(),
            timestamp: now_millis(),
            recovery_time_ms: Some(started.elapsed().as_millis() as u64),
        };
        self.record(&group.group_id, &event);
        Ok(event)
    }

    fn record(&self, group_id: &str, event: &FailoverEvent) {
        {
            let mut counters = self.counters();
            counters.completed += 1;
            counters.total_recovery_ms += event.recovery_time_ms.unwrap_or(0);
        }
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() >= HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        self.metrics.record_failover_event();
        self.events.emit(OrchestratorEvent::FailoverCompleted {
            group_id: group_id.to_string(),
            event: event.clone(),
        });
    }

    /// Operator-driven switch of a group to one of its backups.
    ///
    /// # Errors
    /// `FAILOVER_FAILED` if the group is unknown, `target_node_id` is not a
    /// backup of it, or a failover of the group is in progress
    pub async fn manual_failover(
        &self,
        group_id: &str,
        target_node_id: &str,
        reason: &str,
    ) -> Result<FailoverEvent> {
        let group = self.get_failover_group(group_id).await.ok_or_else(|| {
            OrchestratorError::FailoverFailed(format!("unknown failover group {}", group_id))
        })?;
        if !group.backup_node_ids.iter().any(|b| b == target_node_id) {
            return Err(OrchestratorError::FailoverFailed(format!(
                "{} is not a backup of group {}",
                target_node_id, group_id
            )));
        }

        let pending = FailoverEvent {
            event_type: FailoverEventType::Manual,
            primary_node_id: group.primary_node_id.clone(),
            backup_node_id: target_node_id.to_string(),
            reason: reason.to_string(),
            timestamp: now_millis(),
            recovery_time_ms: None,
        };
        let _active = self.begin(group_id, pending).ok_or_else(|| {
            OrchestratorError::FailoverFailed(format!("failover of {} already in progress", group_id))
        })?;

        let from = group.primary_node_id.clone();
        let config = self.config();
        let result = self
            .switch(&group, &from, target_node_id, FailoverEventType::Manual, reason, true, &config)
            .await;
        if result.is_err() {
            self.counters().failed += 1;
        }
        result
    }

    /// Marks a node healthy again and applies the failback policy.
    ///
    /// # Returns
    /// `RECOVERY` events of groups that failed back to the node
    pub async fn recover_node(&self, node_id: &str) -> Result<Vec<FailoverEvent>> {
        self.update_node_health(node_id, true);
        let config = self.config();

        let groups: Vec<FailoverGroup> = self
            .groups
            .read()
            .await
            .values()
            .filter(|g| g.backup_node_ids.iter().any(|b| b == node_id))
            .cloned()
            .collect();

        if !config.auto_recovery || config.failback_policy == FailbackPolicy::None {
            for group in &groups {
                info!(
                    "{} recovered, staying a backup of {} (primary {})",
                    node_id, group.group_id, group.primary_node_id
                );
            }
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        let mut first_error = None;
        for group in groups.into_iter().filter(|g| g.preferred_primary == node_id) {
            let pending = FailoverEvent {
                event_type: FailoverEventType::Recovery,
                primary_node_id: group.primary_node_id.clone(),
                backup_node_id: node_id.to_string(),
                reason: "preferred primary recovered".to_string(),
                timestamp: now_millis(),
                recovery_time_ms: None,
            };
            let Some(_active) = self.begin(&group.group_id, pending) else {
                warn!("Skipping failback of {}: failover in progress", group.group_id);
                continue;
            };
            let from = group.primary_node_id.clone();
            let result = self
                .switch(
                    &group,
                    &from,
                    node_id,
                    FailoverEventType::Recovery,
                    "preferred primary recovered",
                    true,
                    &config,
                )
                .await;
            match result {
                Ok(event) => events.push(event),
                Err(e) => {
                    self.counters().failed += 1;
                    error!("Failback of group {} failed: {}", group.group_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(events),
        }
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn get_failover_stats(&self) -> FailoverStats {
        let total_groups = self.groups.read().await.len();
        let counters = self.counters();
        FailoverStats {
            enabled: self.config().enabled,
            total_groups,
            active_failovers: self.active.lock().unwrap_or_else(PoisonError::into_inner).len(),
            completed_failovers: counters.completed,
            failed_failovers: counters.failed,
            average_recovery_time_ms: if counters.completed == 0 {
                0.0
            } else {
                counters.total_recovery_ms as f64 / counters.completed as f64
            },
        }
    }
}
