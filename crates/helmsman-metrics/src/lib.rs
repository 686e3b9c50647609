//! Helmsman Metrics Collection
//!
//! Counters and snapshots describing the global orchestrator itself: how
//! many messages it routed, how many scaling and failover actions it took,
//! and whether each of its background services is keeping up.
//!
//! # Architecture
//!
//! - [`MetricsRegistry`]: thread-safe storage with lock-free counters
//! - [`OrchestratorMetricsCollector`]: the handle services record through
//! - [`MetricsSnapshot`], [`GlobalMetrics`], [`ServiceHealthReport`]:
//!   serializable views served by the management API
//!
//! # Service health
//!
//! Background loops (discovery poll, health sweep, scaling tick, ...) never
//! surface their errors to a caller. Instead they report each cycle through
//! [`OrchestratorMetricsCollector::record_service_success`] and
//! [`OrchestratorMetricsCollector::record_service_failure`]. A service with
//! one or two consecutive failed cycles is `degraded`; from three on it is
//! `unhealthy`.

mod collector;
mod registry;
mod snapshot;

pub use collector::OrchestratorMetricsCollector;
pub use registry::MetricsRegistry;
pub use snapshot::{
    GlobalMetrics, LatencySummary, MetricsSnapshot, NodeRoutingMetrics, ServerInfo, ServiceHealth,
    ServiceHealthReport, ServiceKind, ServiceStatus,
};
