//! Sense-and-avoid orchestration.
//!
//! Wraps the `sda-core` planner with the route store, the single-worker
//! planning harness and geodetic conversion at the boundary.

pub mod config;
pub mod engine;
pub mod error;
pub mod projection;
pub mod state;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{SdaEngine, TelemetrySample};
pub use error::{EngineError, Result};
pub use projection::{EnuProjection, GeoPoint, GeoWaypoint, MissionItem, ObstacleReport, Projection};
pub use worker::{LegReport, LegStatus, PlanReport};
