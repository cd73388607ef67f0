//! Sense-and-avoid planning core.
//!
//! Geometry, the obstacle model, curvature-limited steering, the RRT search
//! and the path pruning/rounding stages. Nothing here performs I/O or spawns
//! threads; the orchestrator in `sda-engine` owns scheduling.

pub mod config;
pub mod error;
pub mod geometry;
pub mod models;
pub mod obstacle_model;
pub mod prune;
pub mod rounding;
pub mod rrt;
pub mod steering;
pub mod tree;

pub use config::{PlannerConfig, RoundingConfig};
pub use error::{Result, SdaError};
pub use geometry::{Geofence, Point3, Segment};
pub use models::{LegBaton, Obstacle, ObstacleKind, VehiclePose, Waypoint};
pub use obstacle_model::{ModelPolicy, ObstacleModel, ObstacleSnapshot};
pub use rrt::{Growth, LegOutcome, LegPlan, RrtPlanner, SearchStats};
pub use steering::Steering;
pub use tree::{NodeId, RrtNode, Tree};
