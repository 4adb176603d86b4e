//! Reconciler — the allocation lifecycle state machine.
//!
//! One pass handles one workload key. Passes are stateless: each one
//! re-reads the workload and all inventories, decides a single lifecycle
//! step and issues version-checked writes. A failed write abandons the
//! rest of the pass and asks to be re-triggered.
//!
//! Steps, in evaluation order:
//! 1. neither gated nor protected: ignore;
//! 2. succeeded: mark bound allocations deleting, drop the finalizer;
//! 3. deleted while gated: mark creating/created allocations deleting,
//!    drop the finalizer;
//! 4. deleted after release: wait out the grace period, then as 2;
//! 5. gated with a created allocation: remove the gate, mark it ungated;
//!    a protected workload whose gate is already gone but whose allocation
//!    is still created resumes at the status write;
//! 6. gated without an allocation: reserve the first free slot.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use slicegrid_core::SliceConfig;
use slicegrid_metrics::{AllocationGauge, MetricsSink, NodeReport, SlotGauge};
use slicegrid_placement::{PlacementError, compatible_capacity, find_slot, slot_usage};
use slicegrid_state::{
    Allocation, AllocationStatus, NodeInventory, ResourceAccessor, Versioned, Workload,
    WorkloadKey, WorkloadPhase,
};

use crate::clock::{Clock, SystemClock};
use crate::error::{ReconcileError, ReconcileResult};
use crate::gate::GateDetector;

/// What to do with a key after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing more to do until the next change event.
    Done,
    /// Queue the key again right away.
    Requeue,
    /// Queue the key again after a delay.
    RequeueAfter(Duration),
}

pub struct Reconciler<A: ResourceAccessor> {
    store: A,
    config: SliceConfig,
    gate: GateDetector,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl<A: ResourceAccessor> Reconciler<A> {
    pub fn new(store: A, config: SliceConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_clock(store, config, metrics, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: A,
        config: SliceConfig,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let gate = GateDetector::new(config.domain.clone());
        Self {
            store,
            config,
            gate,
            metrics,
            clock,
        }
    }

    pub fn config(&self) -> &SliceConfig {
        &self.config
    }

    /// Run one pass for a workload and map its outcome to an action.
    pub fn reconcile(&self, key: &WorkloadKey) -> Action {
        let result = self.try_reconcile(key);
        if let Err(e) = self.report_nodes() {
            warn!(error = %e, "failed to refresh node metrics");
        }
        match result {
            Ok(action) => action,
            Err(e) => self.action_for(key, &e),
        }
    }

    /// Retry policy for a pass that ended in an error.
    pub fn action_for(&self, key: &WorkloadKey, err: &ReconcileError) -> Action {
        match err {
            ReconcileError::NotFound(_) => {
                debug!(workload = %key, error = %err, "record vanished, dropping key");
                Action::Done
            }
            ReconcileError::UnsupportedShape { .. } => {
                warn!(workload = %key, error = %err, "workload rejected");
                Action::Done
            }
            ReconcileError::NoCapacity(_) | ReconcileError::MalformedProfile(_) => {
                let delay = self.jitter();
                info!(workload = %key, error = %err, ?delay, "no slot available, retrying later");
                Action::RequeueAfter(delay)
            }
            ReconcileError::Conflict(_) => {
                debug!(workload = %key, error = %err, "write conflict, retrying");
                Action::Requeue
            }
            ReconcileError::Placement(_) => {
                error!(workload = %key, error = %err, "placement failed");
                Action::Done
            }
            ReconcileError::State(_) => {
                error!(workload = %key, error = %err, "state store failure");
                Action::RequeueAfter(self.config.retry_delay())
            }
        }
    }

    /// One reconciliation pass.
    pub fn try_reconcile(&self, key: &WorkloadKey) -> ReconcileResult<Action> {
        let record = self
            .store
            .get_workload(key)?
            .ok_or_else(|| ReconcileError::NotFound(key.to_string()))?;
        let state = self.gate.classify(&record.value);

        if !state.gated && !state.protected {
            debug!(workload = %key, "not managed, ignoring");
            return Ok(Action::Done);
        }

        let inventories = self.store.list_inventories()?;
        let workload = &record.value;

        if workload.phase == WorkloadPhase::Succeeded && state.protected {
            return Ok(self.release_completed(&record, &inventories));
        }
        if workload.is_terminating() && state.gated {
            return Ok(self.release_never_started(&record, &inventories));
        }
        if let Some(deleted_at) = workload.deletion_timestamp_ms {
            if state.protected {
                return Ok(self.release_after_grace(&record, &inventories, deleted_at));
            }
        }
        if state.gated {
            return self.admit(&record, &inventories);
        }
        if state.protected && !workload.has_gate(self.gate.domain()) {
            let created = inventories.iter().find(|inventory| {
                inventory
                    .value
                    .bound_allocation(&workload.uid)
                    .is_some_and(|a| a.status == AllocationStatus::Created)
            });
            if let Some(inventory) = created {
                debug!(workload = %key, "gate already removed, finishing ungate");
                return Ok(self.mark_ungated(&record, inventory));
            }
        }

        debug!(workload = %key, "no lifecycle step applies");
        Ok(Action::Done)
    }

    // ── Teardown ───────────────────────────────────────────────────

    /// Finished workload: tear down every live allocation, then drop the
    /// finalizer.
    fn release_completed(
        &self,
        record: &Versioned<Workload>,
        inventories: &[Versioned<NodeInventory>],
    ) -> Action {
        let key = record.value.key();
        info!(workload = %key, "workload succeeded, releasing slice");
        if self
            .mark_deleting(record, inventories, |status| !status.is_releasing())
            .is_err()
        {
            return self.retry();
        }
        if self.clear_finalizer(record).is_err() {
            return self.retry();
        }
        Action::Done
    }

    /// Deleted before it was ever released: no grace period.
    fn release_never_started(
        &self,
        record: &Versioned<Workload>,
        inventories: &[Versioned<NodeInventory>],
    ) -> Action {
        let key = record.value.key();
        info!(workload = %key, "gated workload deleted, releasing slice");
        if self
            .mark_deleting(record, inventories, |status| {
                matches!(status, AllocationStatus::Creating | AllocationStatus::Created)
            })
            .is_err()
        {
            return self.retry();
        }
        if self.clear_finalizer(record).is_err() {
            // A lost finalizer removal blocks deletion; retry at once.
            return Action::Requeue;
        }
        Action::Done
    }

    /// Deleted after release: keep the slice for the grace period.
    fn release_after_grace(
        &self,
        record: &Versioned<Workload>,
        inventories: &[Versioned<NodeInventory>],
        deleted_at_ms: u64,
    ) -> Action {
        let key = record.value.key();
        let elapsed = Duration::from_millis(self.clock.now_ms().saturating_sub(deleted_at_ms));
        let grace = self.config.grace_period();

        if elapsed <= grace {
            let remaining = grace - elapsed;
            debug!(workload = %key, ?remaining, "in grace period");
            return Action::RequeueAfter(remaining);
        }

        info!(workload = %key, ?elapsed, "grace period over, releasing slice");
        if self
            .mark_deleting(record, inventories, |status| !status.is_releasing())
            .is_err()
        {
            return self.retry();
        }
        if self.clear_finalizer(record).is_err() {
            return self.retry();
        }
        Action::Done
    }

    /// Move every bound allocation whose status passes `select` to
    /// `deleting`, one inventory write each.
    fn mark_deleting(
        &self,
        record: &Versioned<Workload>,
        inventories: &[Versioned<NodeInventory>],
        select: impl Fn(AllocationStatus) -> bool,
    ) -> ReconcileResult<()> {
        let workload = &record.value;
        for inventory in inventories {
            let Some(allocation) = inventory.value.bound_allocation(&workload.uid) else {
                continue;
            };
            if !select(allocation.status) {
                continue;
            }
            if let Err(e) = self.set_status(inventory, &workload.uid, AllocationStatus::Deleting) {
                warn!(
                    workload = %workload.key(),
                    node = %inventory.value.node,
                    error = %e,
                    "failed to mark allocation deleting"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    fn clear_finalizer(&self, record: &Versioned<Workload>) -> ReconcileResult<()> {
        let mut next = record.clone();
        if !next.value.remove_finalizer(self.gate.domain()) {
            return Ok(());
        }
        match self.store.update_workload(&next) {
            Ok(_) => {
                info!(workload = %next.value.key(), "finalizer removed");
                Ok(())
            }
            Err(e) => {
                warn!(workload = %next.value.key(), error = %e, "failed to remove finalizer");
                Err(e.into())
            }
        }
    }

    // ── Admission ──────────────────────────────────────────────────

    fn admit(
        &self,
        record: &Versioned<Workload>,
        inventories: &[Versioned<NodeInventory>],
    ) -> ReconcileResult<Action> {
        let workload = &record.value;
        let key = workload.key();

        let containers = workload.accelerator_containers(&self.config.resource_vendor);
        if containers > 1 {
            return Err(ReconcileError::UnsupportedShape {
                workload: key.to_string(),
                containers,
            });
        }

        let bound = inventories.iter().find_map(|inventory| {
            inventory
                .value
                .bound_allocation(&workload.uid)
                .map(|allocation| (inventory, allocation))
        });

        match bound {
            Some((inventory, allocation)) if allocation.status == AllocationStatus::Created => {
                Ok(self.ungate(record, inventory))
            }
            Some((inventory, allocation)) => {
                debug!(
                    workload = %key,
                    node = %inventory.value.node,
                    status = %allocation.status,
                    "allocation in progress"
                );
                Ok(Action::Done)
            }
            None => self.allocate(workload, inventories),
        }
    }

    /// The slice is realized: let the workload run.
    fn ungate(&self, record: &Versioned<Workload>, inventory: &Versioned<NodeInventory>) -> Action {
        let key = record.value.key();
        let mut next = record.clone();
        next.value.remove_gate(self.gate.domain());
        if let Err(e) = self.store.update_workload(&next) {
            warn!(workload = %key, error = %e, "failed to remove scheduling gate");
            return Action::Requeue;
        }
        self.mark_ungated(record, inventory)
    }

    /// Second half of ungating: record that the workload was let through.
    fn mark_ungated(
        &self,
        record: &Versioned<Workload>,
        inventory: &Versioned<NodeInventory>,
    ) -> Action {
        let key = record.value.key();
        if let Err(e) = self.set_status(inventory, &record.value.uid, AllocationStatus::Ungated) {
            warn!(
                workload = %key,
                node = %inventory.value.node,
                error = %e,
                "failed to mark allocation ungated"
            );
            return Action::Requeue;
        }
        info!(workload = %key, node = %inventory.value.node, "workload ungated");
        Action::Done
    }

    /// Reserve the first free slot across all inventories.
    fn allocate(
        &self,
        workload: &Workload,
        inventories: &[Versioned<NodeInventory>],
    ) -> ReconcileResult<Action> {
        let key = workload.key();
        let profile = workload
            .requested_profile(&self.config.resource_vendor)
            .ok_or_else(|| ReconcileError::MalformedProfile("<none>".to_string()))?;

        if !inventories
            .iter()
            .any(|inventory| inventory.value.placements.contains_key(&profile))
        {
            return Err(ReconcileError::MalformedProfile(profile));
        }

        let mut collided = false;
        for inventory in inventories {
            let candidate = match find_slot(
                &profile,
                &inventory.value,
                self.config.policy,
                self.config.accelerator_order,
                self.config.slot_count,
            ) {
                Ok(Some(candidate)) => candidate,
                Ok(None) => continue,
                Err(e @ PlacementError::UnsupportedLength { .. }) => {
                    warn!(node = %inventory.value.node, error = %e, "skipping inventory");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // Occupancy already excludes realized ranges, so this only
            // trips if the two ever disagree.
            if inventory
                .value
                .has_realized(&candidate.accelerator, candidate.start, candidate.length)
            {
                debug!(
                    workload = %key,
                    node = %candidate.node,
                    accelerator = %candidate.accelerator,
                    start = candidate.start,
                    "slot still realized, teardown pending"
                );
                collided = true;
                continue;
            }

            let allocation = Allocation {
                profile: profile.clone(),
                start: candidate.start,
                length: candidate.length,
                workload_uid: workload.uid.clone(),
                node: candidate.node.clone(),
                accelerator: candidate.accelerator.clone(),
                status: AllocationStatus::Creating,
                namespace: workload.namespace.clone(),
                workload_name: workload.name.clone(),
                provisioning: candidate.provisioning,
            };

            let mut next = inventory.clone();
            next.value
                .allocations
                .insert(workload.uid.clone(), allocation);
            if let Err(e) = self.store.update_inventory(&next) {
                warn!(
                    workload = %key,
                    node = %candidate.node,
                    error = %e,
                    "failed to persist allocation"
                );
                return Ok(Action::Requeue);
            }

            info!(
                workload = %key,
                node = %candidate.node,
                accelerator = %candidate.accelerator,
                start = candidate.start,
                length = candidate.length,
                %profile,
                "slice allocated"
            );
            return Ok(Action::Done);
        }

        if collided {
            return Ok(self.retry());
        }
        Err(ReconcileError::NoCapacity(profile))
    }

    // ── Inventory helpers ──────────────────────────────────────────

    /// Persist a status change of one allocation. Edges outside the
    /// lifecycle are refused without writing.
    fn set_status(
        &self,
        inventory: &Versioned<NodeInventory>,
        uid: &str,
        status: AllocationStatus,
    ) -> ReconcileResult<()> {
        let mut next = inventory.clone();
        let allocation = next
            .value
            .allocations
            .get_mut(uid)
            .ok_or_else(|| ReconcileError::NotFound(format!("allocation {uid}")))?;
        if allocation.status == status {
            return Ok(());
        }
        if !allocation.status.can_transition_to(status) {
            warn!(
                node = %inventory.value.node,
                from = %allocation.status,
                to = %status,
                "refusing lifecycle edge"
            );
            return Ok(());
        }
        let from = allocation.status;
        allocation.status = status;
        self.store.update_inventory(&next)?;
        info!(
            node = %inventory.value.node,
            workload = %inventory.value.allocations[uid].workload_key(),
            %from,
            to = %status,
            "allocation status changed"
        );
        Ok(())
    }

    /// Workload keys an inventory change should wake: allocations the
    /// realization agent just finished creating or tearing down.
    pub fn workloads_for_inventory(&self, node: &str) -> ReconcileResult<Vec<WorkloadKey>> {
        let Some(inventory) = self.store.get_inventory(node)? else {
            return Ok(Vec::new());
        };
        let mut keys: Vec<WorkloadKey> = inventory
            .value
            .allocations
            .values()
            .filter(|a| matches!(a.status, AllocationStatus::Created | AllocationStatus::Deleted))
            .map(Allocation::workload_key)
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Remove allocations the agent has torn down. Returns how many were
    /// removed; a conflicting write removes none.
    pub fn prune_deleted(&self, node: &str) -> ReconcileResult<usize> {
        let Some(inventory) = self.store.get_inventory(node)? else {
            return Ok(0);
        };
        let mut next = inventory.clone();
        next.value
            .allocations
            .retain(|_, a| a.status != AllocationStatus::Deleted);
        let pruned = inventory.value.allocations.len() - next.value.allocations.len();
        if pruned == 0 {
            return Ok(0);
        }
        match self.store.update_inventory(&next) {
            Ok(_) => {
                debug!(%node, pruned, "pruned deleted allocations");
                Ok(pruned)
            }
            Err(e) if e.is_conflict() => {
                debug!(%node, "prune conflicted, next event retries");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Metrics ────────────────────────────────────────────────────

    fn node_report(&self, inventory: &NodeInventory) -> NodeReport {
        let slot_count = self.config.slot_count;
        let slots = inventory
            .accelerators
            .iter()
            .map(|accelerator| {
                let (used, free) = slot_usage(inventory, accelerator, slot_count);
                SlotGauge {
                    accelerator: accelerator.clone(),
                    used,
                    free,
                }
            })
            .collect();
        let allocations = inventory
            .allocations
            .values()
            .filter(|a| a.status != AllocationStatus::Deleted)
            .map(|a| AllocationGauge {
                accelerator: a.accelerator.clone(),
                namespace: a.namespace.clone(),
                workload: a.workload_name.clone(),
                profile: a.profile.clone(),
                size: a.length,
            })
            .collect();
        NodeReport {
            node: inventory.node.clone(),
            slots,
            allocations,
            compatible: compatible_capacity(inventory, slot_count),
        }
    }

    /// Report slot usage, allocations and capacity of every node.
    pub fn report_nodes(&self) -> ReconcileResult<()> {
        for inventory in self.store.list_inventories()? {
            self.metrics.record_node(self.node_report(&inventory.value));
        }
        Ok(())
    }

    /// Drop the series of a node whose inventory was deleted.
    pub fn forget_node(&self, node: &str) {
        self.metrics.forget_node(node);
    }

    /// Full refresh: node gauges plus the count of gated workloads that
    /// hold no allocation yet.
    pub fn refresh_metrics(&self) -> ReconcileResult<()> {
        let inventories = self.store.list_inventories()?;
        for inventory in &inventories {
            self.metrics.record_node(self.node_report(&inventory.value));
        }

        let bound: BTreeSet<&str> = inventories
            .iter()
            .flat_map(|inventory| inventory.value.allocations.values())
            .filter(|a| a.status != AllocationStatus::Deleted)
            .map(|a| a.workload_uid.as_str())
            .collect();
        let pending = self
            .store
            .list_workloads()?
            .iter()
            .filter(|w| self.gate.classify(&w.value).gated && !bound.contains(w.value.uid.as_str()))
            .count();
        self.metrics.record_pending(pending as u64);
        debug!(nodes = inventories.len(), pending, "metrics refreshed");
        Ok(())
    }

    // ── Delays ─────────────────────────────────────────────────────

    fn retry(&self) -> Action {
        Action::RequeueAfter(self.config.retry_delay())
    }

    /// A uniformly random delay within the configured jitter bounds.
    pub fn jitter(&self) -> Duration {
        let (min, max) = self.config.jitter_bounds();
        let (min_ms, max_ms) = (min.as_millis() as u64, max.as_millis() as u64);
        Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
    }
}
