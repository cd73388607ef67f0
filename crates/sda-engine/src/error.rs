use sda_core::SdaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Only one planning worker may run at a time.
    #[error("a planning worker is already running")]
    ConcurrentPlanRequested,

    #[error("legs {start}..={end} are outside a mission with {legs} legs")]
    InvalidLegRange { start: usize, end: usize, legs: usize },

    #[error("planning worker exited without reporting a result")]
    WorkerLost,

    #[error(transparent)]
    Planner(#[from] SdaError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
