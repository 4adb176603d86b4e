//! Record types for the slicegrid store.
//!
//! These types are the persisted shape of workloads and node inventories.
//! All of them serialize to JSON for storage in redb tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slicegrid_core::{extract_profile, is_accelerator_resource};

/// Stable identity of a workload, independent of its name.
pub type Uid = String;

/// Name of a node, and key of its inventory record.
pub type NodeName = String;

/// Identifier of one accelerator on a node.
pub type AcceleratorId = String;

// ── Versioning ────────────────────────────────────────────────────

/// A record together with the store version it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn new(version: u64, value: T) -> Self {
        Self { version, value }
    }
}

// ── Workload ──────────────────────────────────────────────────────

/// Namespaced name of a workload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl WorkloadKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build the composite key for the workloads table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl std::fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Lifecycle phase of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// An observed condition on a workload, such as "scheduling blocked".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkloadCondition {
    pub kind: String,
    pub status: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Resource limits of one container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    #[serde(default)]
    pub limits: BTreeMap<String, u64>,
}

/// A workload waiting for, holding, or releasing a slice.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub uid: Uid,
    #[serde(default)]
    pub scheduling_gates: Vec<String>,
    #[serde(default)]
    pub finalizers: Vec<String>,
    #[serde(default)]
    pub phase: WorkloadPhase,
    #[serde(default)]
    pub conditions: Vec<WorkloadCondition>,
    /// Unix millis at which deletion was requested; unset while live.
    #[serde(default)]
    pub deletion_timestamp_ms: Option<u64>,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}

impl Workload {
    pub fn key(&self) -> WorkloadKey {
        WorkloadKey::new(&self.namespace, &self.name)
    }

    pub fn has_gate(&self, domain: &str) -> bool {
        self.scheduling_gates.iter().any(|g| g == domain)
    }

    pub fn has_finalizer(&self, domain: &str) -> bool {
        self.finalizers.iter().any(|f| f == domain)
    }

    /// Remove the scheduling gate. Returns true if it was present.
    pub fn remove_gate(&mut self, domain: &str) -> bool {
        let before = self.scheduling_gates.len();
        self.scheduling_gates.retain(|g| g != domain);
        self.scheduling_gates.len() != before
    }

    /// Remove the protection finalizer. Returns true if it was present.
    pub fn remove_finalizer(&mut self, domain: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != domain);
        self.finalizers.len() != before
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp_ms.is_some()
    }

    /// Number of containers that request an accelerator slice.
    pub fn accelerator_containers(&self, vendor: &str) -> usize {
        self.containers
            .iter()
            .filter(|c| c.limits.keys().any(|k| is_accelerator_resource(k, vendor)))
            .count()
    }

    /// The slice profile requested by this workload, if any.
    pub fn requested_profile(&self, vendor: &str) -> Option<String> {
        self.containers
            .iter()
            .find_map(|c| extract_profile(c.limits.keys().map(String::as_str), vendor))
    }
}

// ── Node inventory ────────────────────────────────────────────────

/// Identifiers the realization agent needs to carve a slice. Opaque to
/// the controller; copied verbatim into each allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProvisioningIds {
    pub gpu_instance_profile: i32,
    pub compute_instance_profile: i32,
    pub compute_engine_profile: i32,
}

/// Geometry of one profile in a node's placement table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementEntry {
    /// Required contiguous run of slots.
    pub length: u32,
    /// Legal starting offsets.
    pub starts: Vec<u32>,
    #[serde(default)]
    pub provisioning: ProvisioningIds,
}

/// A slice physically present on an accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealizedSlice {
    pub accelerator: AcceleratorId,
    pub start: u32,
    pub length: u32,
}

/// Lifecycle status of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Reserved by the controller, waiting for realization.
    Creating,
    /// Realized by the agent, workload still gated.
    Created,
    /// Workload released; the slice is counted via realized slices.
    Ungated,
    /// Teardown requested.
    Deleting,
    /// Torn down; the range is free again.
    Deleted,
}

impl AllocationStatus {
    /// Whether the allocation's range must be marked in the occupancy scan.
    pub fn occupies_slots(&self) -> bool {
        !matches!(self, AllocationStatus::Deleted | AllocationStatus::Ungated)
    }

    pub fn is_releasing(&self) -> bool {
        matches!(self, AllocationStatus::Deleting | AllocationStatus::Deleted)
    }

    /// Allowed lifecycle edges. Self-transitions are permitted.
    pub fn can_transition_to(&self, next: AllocationStatus) -> bool {
        use AllocationStatus::*;
        *self == next
            || matches!(
                (self, next),
                (Creating, Created)
                    | (Created, Ungated)
                    | (Ungated, Deleting)
                    | (Deleting, Deleted)
                    | (Creating, Deleting)
                    | (Created, Deleting)
            )
    }

    pub fn label(&self) -> &'static str {
        match self {
            AllocationStatus::Creating => "creating",
            AllocationStatus::Created => "created",
            AllocationStatus::Ungated => "ungated",
            AllocationStatus::Deleting => "deleting",
            AllocationStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A slice reservation for one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub profile: String,
    pub start: u32,
    pub length: u32,
    pub workload_uid: Uid,
    pub node: NodeName,
    pub accelerator: AcceleratorId,
    pub status: AllocationStatus,
    pub namespace: String,
    pub workload_name: String,
    #[serde(default)]
    pub provisioning: ProvisioningIds,
}

impl Allocation {
    pub fn workload_key(&self) -> WorkloadKey {
        WorkloadKey::new(&self.namespace, &self.workload_name)
    }

    pub fn end(&self) -> u32 {
        self.start + self.length
    }

    pub fn overlaps(&self, other: &Allocation) -> bool {
        self.accelerator == other.accelerator
            && self.start < other.end()
            && other.start < self.end()
    }
}

/// Per-node accelerator capacity and in-flight allocations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeInventory {
    pub node: NodeName,
    #[serde(default)]
    pub accelerators: Vec<AcceleratorId>,
    /// Slots per accelerator; the controller's default applies when unset.
    #[serde(default)]
    pub slot_count: Option<u32>,
    #[serde(default)]
    pub placements: BTreeMap<String, PlacementEntry>,
    #[serde(default)]
    pub realized: Vec<RealizedSlice>,
    /// Allocations keyed by workload uid.
    #[serde(default)]
    pub allocations: BTreeMap<Uid, Allocation>,
}

impl NodeInventory {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            ..Self::default()
        }
    }

    /// The allocation bound to a workload, ignoring torn-down ones.
    pub fn bound_allocation(&self, uid: &str) -> Option<&Allocation> {
        self.allocations
            .get(uid)
            .filter(|a| a.status != AllocationStatus::Deleted)
    }

    /// Realized slices on one accelerator.
    pub fn realized_on<'a>(&'a self, accelerator: &'a str) -> impl Iterator<Item = &'a RealizedSlice> {
        self.realized.iter().filter(move |s| s.accelerator == accelerator)
    }

    /// Allocations on one accelerator whose ranges count as occupied.
    pub fn occupying_on<'a>(&'a self, accelerator: &'a str) -> impl Iterator<Item = &'a Allocation> {
        self.allocations
            .values()
            .filter(move |a| a.accelerator == accelerator && a.status.occupies_slots())
    }

    /// Whether a realized slice with exactly this geometry exists.
    pub fn has_realized(&self, accelerator: &str, start: u32, length: u32) -> bool {
        self.realized
            .iter()
            .any(|s| s.accelerator == accelerator && s.start == start && s.length == length)
    }
}
