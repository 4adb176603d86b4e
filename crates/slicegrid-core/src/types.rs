//! Shared types used across slicegrid crates.

use serde::{Deserialize, Serialize};

/// Domain identifier used for both the scheduling gate and the
/// protection finalizer on a workload.
pub const DEFAULT_DOMAIN: &str = "org.instaslice/accelerator";

/// Substring that marks a container resource key as accelerator-bearing.
pub const DEFAULT_RESOURCE_VENDOR: &str = "nvidia";

/// Slot count of one accelerator in the reference hardware generation.
pub const DEFAULT_SLOT_COUNT: u32 = 8;

/// Strategy for choosing among several free slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// First legal offset that fits, scanning accelerators in order.
    #[default]
    FirstFit,
    /// Reserved; not implemented.
    LeftToRight,
    /// Reserved; not implemented.
    RightToLeft,
}

impl PlacementPolicy {
    pub fn is_implemented(&self) -> bool {
        matches!(self, PlacementPolicy::FirstFit)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlacementPolicy::FirstFit => "first_fit",
            PlacementPolicy::LeftToRight => "left_to_right",
            PlacementPolicy::RightToLeft => "right_to_left",
        }
    }
}

impl std::fmt::Display for PlacementPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Order in which the accelerators of one inventory are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceleratorOrder {
    /// The order the realization agent recorded them in.
    #[default]
    Declared,
    /// Lexicographic by accelerator identifier.
    Name,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_fit_is_implemented() {
        assert!(PlacementPolicy::FirstFit.is_implemented());
        assert!(!PlacementPolicy::LeftToRight.is_implemented());
        assert!(!PlacementPolicy::RightToLeft.is_implemented());
    }

    #[test]
    fn policy_serializes_snake_case() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            policy: PlacementPolicy,
            order: AcceleratorOrder,
        }

        let w: Wrapper = toml::from_str("policy = \"right_to_left\"\norder = \"name\"").unwrap();
        assert_eq!(w.policy, PlacementPolicy::RightToLeft);
        assert_eq!(w.order, AcceleratorOrder::Name);
        assert_eq!(PlacementPolicy::LeftToRight.to_string(), "left_to_right");
    }
}
