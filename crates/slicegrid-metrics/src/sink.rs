//! Metrics sink — the seam between the controller and the gauge registry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::prometheus::render_prometheus;

/// Used/free slot counts of one accelerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGauge {
    pub accelerator: String,
    pub used: u32,
    pub free: u32,
}

/// Size of one live allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationGauge {
    pub accelerator: String,
    pub namespace: String,
    pub workload: String,
    pub profile: String,
    pub size: u32,
}

/// Everything reported for one node in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeReport {
    pub node: String,
    pub slots: Vec<SlotGauge>,
    pub allocations: Vec<AllocationGauge>,
    /// Profile → number of slices that could still be placed.
    pub compatible: BTreeMap<String, u32>,
}

/// Destination for allocation metrics.
pub trait MetricsSink: Send + Sync {
    /// Replace every series of `report.node` with the report's values.
    fn record_node(&self, report: NodeReport);

    /// Drop all series of a node whose inventory is gone.
    fn forget_node(&self, node: &str);

    /// Number of gated workloads still waiting for a slice.
    fn record_pending(&self, count: u64);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_node(&self, _report: NodeReport) {}

    fn forget_node(&self, _node: &str) {}

    fn record_pending(&self, _count: u64) {}
}

/// In-memory gauge registry, rendered on demand.
#[derive(Debug, Default)]
pub struct SliceMetrics {
    nodes: RwLock<BTreeMap<String, NodeReport>>,
    pending: AtomicU64,
}

impl SliceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last report for a node.
    pub fn node(&self, node: &str) -> Option<NodeReport> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .cloned()
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Render the registry in Prometheus text format.
    pub fn render(&self) -> String {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let reports: Vec<&NodeReport> = nodes.values().collect();
        render_prometheus(&reports, self.pending())
    }
}

impl MetricsSink for SliceMetrics {
    fn record_node(&self, report: NodeReport) {
        debug!(
            node = %report.node,
            accelerators = report.slots.len(),
            allocations = report.allocations.len(),
            "node metrics recorded"
        );
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(report.node.clone(), report);
    }

    fn forget_node(&self, node: &str) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node);
        debug!(%node, "node metrics dropped");
    }

    fn record_pending(&self, count: u64) {
        self.pending.store(count, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(node: &str, used: u32) -> NodeReport {
        NodeReport {
            node: node.to_string(),
            slots: vec![SlotGauge {
                accelerator: "GPU-0".to_string(),
                used,
                free: 8 - used,
            }],
            allocations: Vec::new(),
            compatible: BTreeMap::from([("1g.5gb".to_string(), 8 - used)]),
        }
    }

    #[test]
    fn record_replaces_previous_report() {
        let metrics = SliceMetrics::new();
        metrics.record_node(report("node-1", 1));
        metrics.record_node(report("node-1", 3));

        let stored = metrics.node("node-1").unwrap();
        assert_eq!(stored.slots[0].used, 3);
        assert_eq!(stored.compatible["1g.5gb"], 5);
    }

    #[test]
    fn forget_node_drops_series() {
        let metrics = SliceMetrics::new();
        metrics.record_node(report("node-1", 1));
        metrics.forget_node("node-1");
        assert!(metrics.node("node-1").is_none());
        assert!(!metrics.render().contains("node-1"));
    }

    #[test]
    fn pending_is_overwritten() {
        let metrics = SliceMetrics::new();
        metrics.record_pending(4);
        metrics.record_pending(2);
        assert_eq!(metrics.pending(), 2);
    }

    #[test]
    fn sink_is_object_safe() {
        let sinks: Vec<Box<dyn MetricsSink>> = vec![Box::new(NoopSink), Box::new(SliceMetrics::new())];
        for sink in &sinks {
            sink.record_node(report("node-1", 0));
            sink.record_pending(1);
        }
    }
}
