//! Error taxonomy for geometry and planning.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SdaError {
    /// A geometric construction needed a direction from a zero-length input.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(&'static str),

    /// No candidate node could turn toward the sampled target without colliding.
    #[error("no feasible turn toward the sampled target")]
    ConstraintViolation,

    /// Constrained pruning could not re-fly any subset of the branch's pinned nodes.
    #[error(
        "pruning invariant violated: no subset of {pinned} pinned nodes re-simulates \
         collision-free along a branch of {branch_len} nodes"
    )]
    PruningInvariantViolation { pinned: usize, branch_len: usize },

    #[error("invalid planner configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid geofence: {0}")]
    InvalidGeofence(String),
}

pub type Result<T> = std::result::Result<T, SdaError>;
