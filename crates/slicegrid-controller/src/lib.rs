//! slicegrid-controller — drives slice allocations from request to teardown.
//!
//! Every change to a workload or node inventory queues one reconciliation
//! pass for a workload key. A pass re-reads the workload and every
//! inventory, classifies the workload, and performs at most one lifecycle
//! step: tear down, release, or reserve a new slice.
//!
//! # Architecture
//!
//! ```text
//! Controller
//!   ├── StateStore change feed → WorkQueue (de-duplicated keys)
//!   ├── N workers            → Reconciler::reconcile() → Action
//!   ├── re-trigger tasks     → sleep, then re-queue the key
//!   └── metrics refresh      → Reconciler::refresh_metrics()
//!
//! Reconciler
//!   ├── GateDetector (gated / protected)
//!   ├── find_slot() from slicegrid-placement
//!   └── MetricsSink (slot usage, allocations, capacity)
//! ```

pub mod clock;
pub mod controller;
pub mod error;
pub mod gate;
pub mod queue;
pub mod reconciler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::Controller;
pub use error::{ReconcileError, ReconcileResult};
pub use gate::{GateDetector, GateState};
pub use queue::WorkQueue;
pub use reconciler::{Action, Reconciler};
