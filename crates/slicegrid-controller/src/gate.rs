//! Admission gate detection.

use slicegrid_state::{Workload, WorkloadPhase};

/// Condition reason reported while a scheduling gate holds a workload.
pub const SCHEDULING_GATED_REASON: &str = "SchedulingGated";

/// How the controller sees one workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateState {
    /// Blocked pending a slice.
    pub gated: bool,
    /// Carries the protection finalizer.
    pub protected: bool,
}

/// Classifies workloads against one domain identifier.
#[derive(Debug, Clone)]
pub struct GateDetector {
    domain: String,
}

impl GateDetector {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// A workload is gated when it holds our scheduling gate, is still
    /// pending, and reports the scheduling block in a condition.
    pub fn classify(&self, workload: &Workload) -> GateState {
        let blocked = workload
            .conditions
            .iter()
            .any(|c| c.message.contains("blocked") || c.reason == SCHEDULING_GATED_REASON);
        GateState {
            gated: workload.has_gate(&self.domain)
                && workload.phase == WorkloadPhase::Pending
                && blocked,
            protected: workload.has_finalizer(&self.domain),
        }
    }
}
