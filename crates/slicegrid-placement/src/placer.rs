//! Placement engine — first-fit slot search on one node.
//!
//! For each candidate accelerator the placer builds an occupancy bitmap
//! from realized slices and occupying allocations, then scans the
//! profile's legal starts in table order and returns the first one
//! whose range is in bounds and entirely free.

use slicegrid_core::{AcceleratorOrder, PlacementPolicy};
use slicegrid_state::{AcceleratorId, NodeInventory, NodeName, ProvisioningIds};
use tracing::debug;

use crate::error::PlacementError;
use crate::occupancy::Occupancy;

/// Slice lengths the placement engine can carve.
pub const SUPPORTED_LENGTHS: [u32; 4] = [1, 2, 4, 8];

/// A free slot found for a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCandidate {
    pub node: NodeName,
    pub accelerator: AcceleratorId,
    pub start: u32,
    pub length: u32,
    pub provisioning: ProvisioningIds,
}

/// Accelerators of an inventory in scan order.
pub(crate) fn scan_order(inventory: &NodeInventory, order: AcceleratorOrder) -> Vec<&str> {
    let mut accelerators: Vec<&str> = inventory.accelerators.iter().map(String::as_str).collect();
    if order == AcceleratorOrder::Name {
        accelerators.sort_unstable();
    }
    accelerators
}

/// Legal starts of a placement entry in table order, first occurrence kept.
pub(crate) fn table_starts(starts: &[u32]) -> Vec<u32> {
    let mut ordered = Vec::with_capacity(starts.len());
    for &start in starts {
        if !ordered.contains(&start) {
            ordered.push(start);
        }
    }
    ordered
}

/// Find a free slot for `profile` on this inventory.
///
/// Returns `Ok(None)` when the profile is absent from the placement table
/// or when no accelerator has a fitting free range.
pub fn find_slot(
    profile: &str,
    inventory: &NodeInventory,
    policy: PlacementPolicy,
    order: AcceleratorOrder,
    default_slot_count: u32,
) -> Result<Option<SlotCandidate>, PlacementError> {
    if policy != PlacementPolicy::FirstFit {
        return Err(PlacementError::PolicyNotImplemented(policy));
    }

    let Some(entry) = inventory.placements.get(profile) else {
        debug!(node = %inventory.node, %profile, "profile not in placement table");
        return Ok(None);
    };
    if !SUPPORTED_LENGTHS.contains(&entry.length) {
        return Err(PlacementError::UnsupportedLength {
            profile: profile.to_string(),
            length: entry.length,
        });
    }

    let width = inventory.slot_count.unwrap_or(default_slot_count);
    let starts = table_starts(&entry.starts);

    for accelerator in scan_order(inventory, order) {
        let occupancy = Occupancy::for_accelerator(inventory, accelerator, width);
        if let Some(start) = starts
            .iter()
            .copied()
            .find(|&start| occupancy.is_free_range(start, entry.length))
        {
            debug!(
                node = %inventory.node,
                accelerator,
                start,
                length = entry.length,
                %profile,
                "found free slot"
            );
            return Ok(Some(SlotCandidate {
                node: inventory.node.clone(),
                accelerator: accelerator.to_string(),
                start,
                length: entry.length,
                provisioning: entry.provisioning,
            }));
        }
    }

    debug!(node = %inventory.node, %profile, "no free slot");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slicegrid_state::{Allocation, AllocationStatus, PlacementEntry, RealizedSlice};
    use std::collections::BTreeMap;

    fn inventory(accelerators: &[&str]) -> NodeInventory {
        NodeInventory {
            node: "node-1".to_string(),
            accelerators: accelerators.iter().map(|a| a.to_string()).collect(),
            slot_count: Some(8),
            placements: BTreeMap::from([
                (
                    "1g.5gb".to_string(),
                    PlacementEntry {
                        length: 1,
                        starts: (0..7).collect(),
                        provisioning: ProvisioningIds {
                            gpu_instance_profile: 19,
                            compute_instance_profile: 0,
                            compute_engine_profile: 0,
                        },
                    },
                ),
                (
                    "2g.10gb".to_string(),
                    PlacementEntry {
                        length: 2,
                        starts: vec![0, 2, 4],
                        provisioning: ProvisioningIds::default(),
                    },
                ),
                (
                    "7g.40gb".to_string(),
                    PlacementEntry {
                        length: 8,
                        starts: vec![0],
                        provisioning: ProvisioningIds::default(),
                    },
                ),
            ]),
            ..NodeInventory::default()
        }
    }

    fn allocation(uid: &str, accelerator: &str, start: u32, length: u32, status: AllocationStatus) -> Allocation {
        Allocation {
            profile: "1g.5gb".to_string(),
            start,
            length,
            workload_uid: uid.to_string(),
            node: "node-1".to_string(),
            accelerator: accelerator.to_string(),
            status,
            namespace: "default".to_string(),
            workload_name: uid.to_string(),
            provisioning: ProvisioningIds::default(),
        }
    }

    fn first_fit(profile: &str, inv: &NodeInventory) -> Option<SlotCandidate> {
        find_slot(profile, inv, PlacementPolicy::FirstFit, AcceleratorOrder::Declared, 8).unwrap()
    }

    #[test]
    fn empty_accelerator_places_at_zero() {
        let inv = inventory(&["GPU-0"]);
        let slot = first_fit("1g.5gb", &inv).unwrap();
        assert_eq!(slot.accelerator, "GPU-0");
        assert_eq!(slot.start, 0);
        assert_eq!(slot.length, 1);
        assert_eq!(slot.provisioning.gpu_instance_profile, 19);
    }

    #[test]
    fn occupied_slot_moves_to_next_start() {
        let mut inv = inventory(&["GPU-0"]);
        inv.allocations.insert(
            "a".into(),
            allocation("a", "GPU-0", 0, 1, AllocationStatus::Creating),
        );
        assert_eq!(first_fit("1g.5gb", &inv).unwrap().start, 1);
    }

    #[test]
    fn whole_accelerator_profile_needs_every_slot_free() {
        let mut inv = inventory(&["GPU-0"]);
        inv.realized.push(RealizedSlice {
            accelerator: "GPU-0".into(),
            start: 3,
            length: 1,
        });
        assert!(first_fit("7g.40gb", &inv).is_none());
    }

    #[test]
    fn starts_are_scanned_in_table_order() {
        let mut inv = inventory(&["GPU-0"]);
        inv.placements.get_mut("2g.10gb").unwrap().starts = vec![4, 0, 2];
        assert_eq!(first_fit("2g.10gb", &inv).unwrap().start, 4);

        inv.realized.push(RealizedSlice {
            accelerator: "GPU-0".into(),
            start: 4,
            length: 2,
        });
        assert_eq!(first_fit("2g.10gb", &inv).unwrap().start, 0);
    }

    #[test]
    fn repeated_starts_are_scanned_once() {
        assert_eq!(table_starts(&[6, 2, 6, 0, 2]), vec![6, 2, 0]);
        assert_eq!(table_starts(&[]), Vec::<u32>::new());
    }

    #[test]
    fn ungated_and_deleted_allocations_do_not_occupy() {
        let mut inv = inventory(&["GPU-0"]);
        inv.allocations.insert(
            "a".into(),
            allocation("a", "GPU-0", 0, 1, AllocationStatus::Deleted),
        );
        inv.allocations.insert(
            "b".into(),
            allocation("b", "GPU-0", 1, 1, AllocationStatus::Ungated),
        );
        assert_eq!(first_fit("1g.5gb", &inv).unwrap().start, 0);
    }

    #[test]
    fn full_accelerator_falls_through_to_next() {
        let mut inv = inventory(&["GPU-0", "GPU-1"]);
        inv.realized.push(RealizedSlice {
            accelerator: "GPU-0".into(),
            start: 0,
            length: 8,
        });
        let slot = first_fit("2g.10gb", &inv).unwrap();
        assert_eq!(slot.accelerator, "GPU-1");
        assert_eq!(slot.start, 0);
    }

    #[test]
    fn name_order_sorts_accelerators() {
        let inv = inventory(&["GPU-b", "GPU-a"]);
        let declared = first_fit("1g.5gb", &inv).unwrap();
        assert_eq!(declared.accelerator, "GPU-b");

        let named = find_slot("1g.5gb", &inv, PlacementPolicy::FirstFit, AcceleratorOrder::Name, 8)
            .unwrap()
            .unwrap();
        assert_eq!(named.accelerator, "GPU-a");
    }

    #[test]
    fn unknown_profile_is_none() {
        let inv = inventory(&["GPU-0"]);
        assert!(first_fit("3g.20gb", &inv).is_none());
    }

    #[test]
    fn unsupported_length_is_an_error() {
        let mut inv = inventory(&["GPU-0"]);
        inv.placements.insert(
            "3g.20gb".into(),
            PlacementEntry {
                length: 3,
                starts: vec![0],
                provisioning: ProvisioningIds::default(),
            },
        );
        let err = find_slot("3g.20gb", &inv, PlacementPolicy::FirstFit, AcceleratorOrder::Declared, 8)
            .unwrap_err();
        assert!(matches!(err, PlacementError::UnsupportedLength { length: 3, .. }));
    }

    #[test]
    fn unimplemented_policies_fail_fast() {
        let inv = inventory(&["GPU-0"]);
        for policy in [PlacementPolicy::LeftToRight, PlacementPolicy::RightToLeft] {
            let err = find_slot("1g.5gb", &inv, policy, AcceleratorOrder::Declared, 8).unwrap_err();
            assert_eq!(err, PlacementError::PolicyNotImplemented(policy));
        }
    }

    #[test]
    fn default_slot_count_applies_when_unset() {
        let mut inv = inventory(&["GPU-0"]);
        inv.slot_count = None;
        assert!(
            find_slot("7g.40gb", &inv, PlacementPolicy::FirstFit, AcceleratorOrder::Declared, 4)
                .unwrap()
                .is_none()
        );
        assert!(
            find_slot("2g.10gb", &inv, PlacementPolicy::FirstFit, AcceleratorOrder::Declared, 4)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn repeated_placement_never_overlaps() {
        let mut inv = inventory(&["GPU-0", "GPU-1"]);
        let mut placed = Vec::new();
        for i in 0.. {
            let Some(slot) = first_fit("2g.10gb", &inv) else { break };
            let uid = format!("w-{i}");
            let a = allocation(&uid, &slot.accelerator, slot.start, slot.length, AllocationStatus::Creating);
            assert!(placed.iter().all(|p: &Allocation| !p.overlaps(&a)));
            placed.push(a.clone());
            inv.allocations.insert(uid, a);
        }
        // Three legal starts per accelerator.
        assert_eq!(placed.len(), 6);
    }
}
