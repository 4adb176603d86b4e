//! slicegrid-core — shared types and configuration for slicegrid.
//!
//! Holds the pieces every other crate agrees on: the controller
//! configuration loaded from `slicegrid.toml`, the placement policy and
//! scan-order selectors, and the parser that turns a container resource
//! key such as `nvidia.com/mig-1g.5gb` into a slice profile name.

pub mod config;
pub mod profile;
pub mod types;

pub use config::{ConfigError, SliceConfig};
pub use profile::{extract_profile, is_accelerator_resource};
pub use types::*;
