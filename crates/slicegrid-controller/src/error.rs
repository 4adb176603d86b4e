//! Reconciliation error types.

use slicegrid_placement::PlacementError;
use slicegrid_state::StateError;
use thiserror::Error;

/// Errors that end a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("write conflict on {0}")]
    Conflict(String),

    #[error("no free slot for profile {0}")]
    NoCapacity(String),

    #[error("workload {workload} has {containers} accelerator containers, only one is supported")]
    UnsupportedShape { workload: String, containers: usize },

    #[error("profile {0} is not offered by any node")]
    MalformedProfile(String),

    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("state store error: {0}")]
    State(StateError),
}

impl From<StateError> for ReconcileError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(key) => ReconcileError::NotFound(key),
            StateError::Conflict { key, .. } => ReconcileError::Conflict(key),
            other => ReconcileError::State(other),
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
