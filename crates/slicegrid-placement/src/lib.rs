//! slicegrid placement engine.
//!
//! Finds a free, correctly-shaped slot for a slice profile on one node's
//! accelerators. Placement works on in-memory snapshots of
//! [`NodeInventory`](slicegrid_state::NodeInventory) records only; it
//! never writes anything.
//!
//! # Components
//!
//! - **`occupancy`** — per-accelerator slot bitmap
//! - **`placer`** — `find_slot`, the first-fit search
//! - **`capacity`** — slot usage and compatible-profile capacity for metrics

pub mod capacity;
pub mod error;
pub mod occupancy;
pub mod placer;

pub use capacity::{compatible_capacity, slot_usage};
pub use error::PlacementError;
pub use occupancy::Occupancy;
pub use placer::{SUPPORTED_LENGTHS, SlotCandidate, find_slot};
