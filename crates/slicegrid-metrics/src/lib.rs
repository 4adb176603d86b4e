//! slicegrid-metrics — observability for slice allocation.
//!
//! The controller reports through the [`MetricsSink`] trait; it never
//! touches a process-wide registry. [`SliceMetrics`] is the gauge
//! registry the daemon serves on `/metrics`.
//!
//! # Architecture
//!
//! ```text
//! Reconciler / metrics refresh
//!   ├── record_node()    ← per node: slot usage, allocations, capacity
//!   └── record_pending() ← gated workloads still waiting for a slice
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod prometheus;
pub mod sink;

pub use prometheus::render_prometheus;
pub use sink::{AllocationGauge, MetricsSink, NodeReport, NoopSink, SliceMetrics, SlotGauge};
