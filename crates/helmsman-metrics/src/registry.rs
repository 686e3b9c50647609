use crate::snapshot::{LatencySummary, MetricsSnapshot, NodeRoutingMetrics, ServiceHealth, ServiceKind, ServiceStatus};
use helmsman_common::time::now_millis;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock as StdRwLock};
use std::time::Instant;

/// One bin per power of two of microseconds, up to roughly 36 minutes.
const NUM_HISTOGRAM_BINS: usize = 32;

/// Upper bound on the per-node routing table.
///
/// When exceeded, the node routed to least recently is evicted.
const MAX_TRACKED_NODES: usize = 1000;

/// Power-of-two histogram of routing latencies.
///
/// Recording is lock-free. Percentiles are estimated as the upper bound
/// of the bin holding the requested rank, so they overestimate by at most 2x.
#[derive(Debug)]
struct LatencyHistogram {
    bins: [AtomicU64; NUM_HISTOGRAM_BINS],
    total_latency: AtomicU64,
    sample_count: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    fn record(&self, latency_us: u64) {
        self.bins[Self::latency_to_bin(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.total_latency.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Bin `i` holds latencies in `[2^(i-1), 2^i)`; bin 0 holds zero.
    fn latency_to_bin(latency_us: u64) -> usize {
        let bits = (u64::BITS - latency_us.leading_zeros()) as usize;
        bits.min(NUM_HISTOGRAM_BINS - 1)
    }

    fn bin_upper_bound(bin: usize) -> u64 {
        if bin == 0 {
            0
        } else {
            (1u64 << bin) - 1
        }
    }

    fn estimate_percentile(&self, percentile: u64) -> u64 {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }

        // Rank of the sample we are looking for, 1-based
        let target = ((total * percentile).div_ceil(100)).max(1);
        let mut cumulative = 0;
        for (bin, count) in self.bins.iter().enumerate() {
            cumulative += count.load(Ordering::Relaxed);
            if cumulative >= target {
                return Self::bin_upper_bound(bin);
            }
        }
        Self::bin_upper_bound(NUM_HISTOGRAM_BINS - 1)
    }

    fn summary(&self) -> LatencySummary {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return LatencySummary::default();
        }

        LatencySummary {
            avg_us: self.total_latency.load(Ordering::Relaxed) / total,
            p50_us: self.estimate_percentile(50),
            p95_us: self.estimate_percentile(95),
            p99_us: self.estimate_percentile(99),
        }
    }
}

#[derive(Debug)]
struct NodeStats {
    routed_count: AtomicU64,
    last_routed_ms: AtomicU64,
}

impl NodeStats {
    fn new() -> Self {
        Self {
            routed_count: AtomicU64::new(0),
            last_routed_ms: AtomicU64::new(now_millis()),
        }
    }
}

/// Failure streak and last outcome of one background service.
#[derive(Debug, Default)]
struct ServiceStats {
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    /// Zero until the first success
    last_success_ms: AtomicU64,
    last_error: StdRwLock<Option<String>>,
}

/// Thread-safe storage for every orchestrator counter.
///
/// Counters are atomics updated with relaxed ordering; snapshots are
/// eventually consistent. The per-node table sits behind an `RwLock`
/// that is only written when a node is seen for the first time.
#[derive(Debug)]
pub struct MetricsRegistry {
    node_limit: usize,
    start_time: Instant,
    routing_decisions: AtomicU64,
    routing_failures: AtomicU64,
    cross_federation_messages: AtomicU64,
    scaling_events: AtomicU64,
    failover_events: AtomicU64,
    routing_latency: LatencyHistogram,
    nodes: StdRwLock<HashMap<String, NodeStats>>,
    services: [ServiceStats; ServiceKind::COUNT],
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_node_limit(MAX_TRACKED_NODES)
    }

    fn with_node_limit(node_limit: usize) -> Self {
        Self {
            node_limit,
            start_time: Instant::now(),
            routing_decisions: AtomicU64::new(0),
            routing_failures: AtomicU64::new(0),
            cross_federation_messages: AtomicU64::new(0),
            scaling_events: AtomicU64::new(0),
            failover_events: AtomicU64::new(0),
            routing_latency: LatencyHistogram::new(),
            nodes: StdRwLock::new(HashMap::new()),
            services: std::array::from_fn(|_| ServiceStats::default()),
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn record_routing_decision(&self, node_id: &str, cross_federation: bool, latency_us: u64) {
        self.routing_decisions.fetch_add(1, Ordering::Relaxed);
        self.routing_latency.record(latency_us);
        if cross_federation {
            self.cross_federation_messages.fetch_add(1, Ordering::Relaxed);
        }
        self.record_node(node_id);
    }

    pub fn record_routing_failure(&self, latency_us: u64) {
        self.routing_failures.fetch_add(1, Ordering::Relaxed);
        self.routing_latency.record(latency_us);
    }

    pub fn record_scaling_event(&self) {
        self.scaling_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failover_event(&self) {
        self.failover_events.fetch_add(1, Ordering::Relaxed);
    }

    fn record_node(&self, node_id: &str) {
        {
            let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(stats) = nodes.get(node_id) {
                stats.routed_count.fetch_add(1, Ordering::Relaxed);
                stats.last_routed_ms.store(now_millis(), Ordering::Relaxed);
                return;
            }
        }

        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if !nodes.contains_key(node_id) && nodes.len() >= self.node_limit {
            let oldest = nodes
                .iter()
                .min_by_key(|(_, stats)| stats.last_routed_ms.load(Ordering::Relaxed))
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                nodes.remove(&oldest);
            }
        }
        let stats = nodes.entry(node_id.to_string()).or_insert_with(NodeStats::new);
        stats.routed_count.fetch_add(1, Ordering::Relaxed);
        stats.last_routed_ms.store(now_millis(), Ordering::Relaxed);
    }

    /// Drops the routing entry of a node that left the fleet.
    pub fn forget_node(&self, node_id: &str) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node_id);
    }

    pub fn record_service_success(&self, service: ServiceKind) {
        let stats = &self.services[service.index()];
        stats.consecutive_failures.store(0, Ordering::Relaxed);
        stats.last_success_ms.store(now_millis(), Ordering::Relaxed);
    }

    pub fn record_service_failure(&self, service: ServiceKind, error: &str) {
        let stats = &self.services[service.index()];
        stats.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        stats.total_failures.fetch_add(1, Ordering::Relaxed);
        *stats.last_error.write().unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }

    pub fn service_health(&self, service: ServiceKind, running: bool) -> ServiceHealth {
        let stats = &self.services[service.index()];
        let consecutive_failures = stats.consecutive_failures.load(Ordering::Relaxed);
        let last_success = stats.last_success_ms.load(Ordering::Relaxed);

        ServiceHealth {
            service,
            status: ServiceStatus::from_failures(running, consecutive_failures),
            running,
            consecutive_failures,
            total_failures: stats.total_failures.load(Ordering::Relaxed),
            last_error: stats
                .last_error
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            last_success: (last_success > 0).then_some(last_success),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let nodes: BTreeMap<String, NodeRoutingMetrics> = self
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, stats)| {
                let mut metrics = NodeRoutingMetrics::new(id.clone());
                metrics.routed_count = stats.routed_count.load(Ordering::Relaxed);
                metrics.last_routed_ms = stats.last_routed_ms.load(Ordering::Relaxed);
                (id.clone(), metrics)
            })
            .collect();

        MetricsSnapshot {
            uptime_ms: self.uptime_ms(),
            routing_decisions: self.routing_decisions.load(Ordering::Relaxed),
            routing_failures: self.routing_failures.load(Ordering::Relaxed),
            cross_federation_messages: self.cross_federation_messages.load(Ordering::Relaxed),
            scaling_events: self.scaling_events.load(Ordering::Relaxed),
            failover_events: self.failover_events.load(Ordering::Relaxed),
            routing_latency: self.routing_latency.summary(),
            nodes,
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
