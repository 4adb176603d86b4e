//! slicegrid-state — record store for slicegrid.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the two record kinds the
//! controller works on:
//!
//! - **Workload** — a unit of work that asks for one slice profile, keyed
//!   by `{namespace}/{name}`.
//! - **NodeInventory** — one node's accelerators, placement table,
//!   realized slices and in-flight allocations, keyed by node name.
//!
//! Every record is stored as a [`Versioned`] JSON document. Updates go
//! through [`ResourceAccessor`] and must present the version they read;
//! a stale version fails with [`StateError::Conflict`]. Writes publish a
//! [`ChangeEvent`] on a broadcast feed that drives reconciliation.

pub mod accessor;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use accessor::{ChangeEvent, ResourceAccessor};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
