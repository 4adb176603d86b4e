//! Capacity views derived from occupancy, reported as metrics.

use std::collections::BTreeMap;

use slicegrid_core::AcceleratorOrder;
use slicegrid_state::NodeInventory;

use crate::occupancy::Occupancy;
use crate::placer::{SUPPORTED_LENGTHS, scan_order, table_starts};

/// `(used, free)` slot counts of one accelerator.
pub fn slot_usage(inventory: &NodeInventory, accelerator: &str, default_slot_count: u32) -> (u32, u32) {
    let width = inventory.slot_count.unwrap_or(default_slot_count);
    let occupancy = Occupancy::for_accelerator(inventory, accelerator, width);
    (occupancy.used(), occupancy.free())
}

/// How many more slices of each profile could be placed on this node now.
///
/// Each profile is counted independently: starting from the current
/// occupancy, slices are placed greedily first-fit until none fits.
/// Profiles with an unsupported length count as zero.
pub fn compatible_capacity(inventory: &NodeInventory, default_slot_count: u32) -> BTreeMap<String, u32> {
    let width = inventory.slot_count.unwrap_or(default_slot_count);
    let accelerators = scan_order(inventory, AcceleratorOrder::Declared);
    let base: Vec<Occupancy> = accelerators
        .iter()
        .map(|acc| Occupancy::for_accelerator(inventory, acc, width))
        .collect();

    let mut capacity = BTreeMap::new();
    for (profile, entry) in &inventory.placements {
        let mut count = 0;
        if SUPPORTED_LENGTHS.contains(&entry.length) {
            let starts = table_starts(&entry.starts);
            for occupancy in &base {
                let mut scratch = *occupancy;
                for &start in &starts {
                    if scratch.is_free_range(start, entry.length) {
                        scratch.mark(start, entry.length);
                        count += 1;
                    }
                }
            }
        }
        capacity.insert(profile.clone(), count);
    }
    capacity
}
