//! The resource accessor seam between the controller and its record store.

use crate::error::StateResult;
use crate::types::{NodeInventory, NodeName, Versioned, Workload, WorkloadKey};

/// A change published by the store after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Workload(WorkloadKey),
    Inventory(NodeName),
}

/// Get/list/update access to workloads and node inventories.
///
/// Updates are optimistic: the record passed in carries the version it
/// was read at, and the write fails with `StateError::Conflict` if the
/// stored version has moved on. A missing record fails with
/// `StateError::NotFound`. On success the new version is returned.
pub trait ResourceAccessor: Send + Sync {
    fn get_workload(&self, key: &WorkloadKey) -> StateResult<Option<Versioned<Workload>>>;

    fn list_workloads(&self) -> StateResult<Vec<Versioned<Workload>>>;

    fn update_workload(&self, record: &Versioned<Workload>) -> StateResult<u64>;

    fn get_inventory(&self, node: &str) -> StateResult<Option<Versioned<NodeInventory>>>;

    /// All inventories, ordered by node name.
    fn list_inventories(&self) -> StateResult<Vec<Versioned<NodeInventory>>>;

    fn update_inventory(&self, record: &Versioned<NodeInventory>) -> StateResult<u64>;
}
