use helmsman_common::{HealthStatus, LoadMetrics};
use std::collections::VecDeque;

/// Outcome of a single health probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(String),
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Hysteresis thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HysteresisConfig {
    /// Consecutive good probes needed to resolve a node healthy
    pub healthy_threshold: u32,
    /// Consecutive bad probes needed to resolve a node unhealthy
    pub unhealthy_threshold: u32,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        }
    }
}

/// A change of resolved status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthStatus,
    pub to: HealthStatus,
}

/// Health bookkeeping of one node inside the health monitor.
///
/// Tracks the resolved status, the current streak of consistent probe
/// outcomes and a bounded ring of load samples.
#[derive(Debug, Clone)]
pub struct NodeHealthState {
    pub node_id: String,
    pub status: HealthStatus,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_outcome: Option<ProbeOutcome>,
    /// Wall-clock time the last applied probe was issued, ms since epoch
    pub last_probe_issued_at: u64,
    metrics: VecDeque<LoadMetrics>,
    metrics_capacity: usize,
}

impl NodeHealthState {
    pub fn new(node_id: String, metrics_capacity: usize) -> Self {
        Self {
            node_id,
            status: HealthStatus::Unknown,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_outcome: None,
            last_probe_issued_at: 0,
            metrics: VecDeque::new(),
            metrics_capacity: metrics_capacity.max(1),
        }
    }

    /// Applies a probe outcome and resolves the status.
    ///
    /// A status change is accepted only once the streak of the matching
    /// outcome reaches its threshold. `Unknown` and `Degraded` nodes resolve
    /// through the same thresholds.
    ///
    /// # Returns
    /// The transition, if the resolved status changed
    pub fn record_probe(&mut self, outcome: ProbeOutcome, config: &HysteresisConfig) -> Option<Transition> {
        let target = if outcome.is_healthy() {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            (self.consecutive_successes >= config.healthy_threshold).then_some(HealthStatus::Healthy)
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
            (self.consecutive_failures >= config.unhealthy_threshold).then_some(HealthStatus::Unhealthy)
        };
        self.last_outcome = Some(outcome);

        target.and_then(|to| self.transition(to))
    }

    /// Sets the resolved status directly, resetting both streaks.
    pub fn force_status(&mut self, status: HealthStatus) -> Option<Transition> {
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
        self.transition(status)
    }

    fn transition(&mut self, to: HealthStatus) -> Option<Transition> {
        if self.status == to {
            return None;
        }
        let from = std::mem::replace(&mut self.status, to);
        Some(Transition { from, to })
    }

    /// Appends a sample, dropping the oldest beyond capacity.
    pub fn push_metrics(&mut self, sample: LoadMetrics) {
        while self.metrics.len() >= self.metrics_capacity {
            self.metrics.pop_front();
        }
        self.metrics.push_back(sample);
    }

    pub fn set_metrics_capacity(&mut self, capacity: usize) {
        self.metrics_capacity = capacity.max(1);
        while self.metrics.len() > self.metrics_capacity {
            self.metrics.pop_front();
        }
    }

    pub fn latest_metrics(&self) -> Option<&LoadMetrics> {
        self.metrics.back()
    }

    /// Up to `limit` most recent samples, oldest first.
    pub fn recent_metrics(&self, limit: usize) -> Vec<LoadMetrics> {
        let skip = self.metrics.len().saturating_sub(limit);
        self.metrics.iter().skip(skip).cloned().collect()
    }

    pub fn metrics_len(&self) -> usize {
        self.metrics.len()
    }
}
