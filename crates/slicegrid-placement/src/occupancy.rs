//! Slot occupancy of one accelerator.

use slicegrid_state::NodeInventory;

/// Largest slot count an accelerator may report.
pub const MAX_SLOTS: u32 = 64;

/// Bitmap of occupied slots; bit `i` set means slot `i` is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    width: u32,
    bits: u64,
}

fn range_mask(start: u32, length: u32) -> u64 {
    if length == 0 {
        return 0;
    }
    let ones = if length >= 64 {
        u64::MAX
    } else {
        (1u64 << length) - 1
    };
    ones << start
}

impl Occupancy {
    /// An empty bitmap of `width` slots, capped at [`MAX_SLOTS`].
    pub fn new(width: u32) -> Self {
        Self {
            width: width.min(MAX_SLOTS),
            bits: 0,
        }
    }

    /// Build the bitmap for one accelerator from realized slices and from
    /// allocations whose ranges still count as occupied.
    pub fn for_accelerator(inventory: &NodeInventory, accelerator: &str, width: u32) -> Self {
        let mut occupancy = Self::new(width);
        for slice in inventory.realized_on(accelerator) {
            occupancy.mark(slice.start, slice.length);
        }
        for allocation in inventory.occupying_on(accelerator) {
            occupancy.mark(allocation.start, allocation.length);
        }
        occupancy
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Mark `[start, start + length)` as occupied. Slots beyond the width
    /// are ignored.
    pub fn mark(&mut self, start: u32, length: u32) {
        if start >= self.width {
            return;
        }
        let length = length.min(self.width - start);
        self.bits |= range_mask(start, length);
    }

    /// Whether `[start, start + length)` lies within the accelerator and
    /// contains no occupied slot.
    pub fn is_free_range(&self, start: u32, length: u32) -> bool {
        if length == 0 {
            return false;
        }
        match start.checked_add(length) {
            Some(end) if end <= self.width => self.bits & range_mask(start, length) == 0,
            _ => false,
        }
    }

    pub fn used(&self) -> u32 {
        self.bits.count_ones()
    }

    pub fn free(&self) -> u32 {
        self.width - self.used()
    }
}
