use slicegrid_core::PlacementPolicy;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("placement policy `{0}` is not implemented")]
    PolicyNotImplemented(PlacementPolicy),

    #[error("profile {profile} has unsupported slice length {length}")]
    UnsupportedLength { profile: String, length: u32 },
}
