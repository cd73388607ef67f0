//! Domain records shared between the planner and the orchestrator.

use crate::geometry::{Point3, Segment};
use serde::{Deserialize, Serialize};

/// MAVLink NAV_WAYPOINT, the command carried by inserted detour waypoints.
pub const NAV_WAYPOINT_COMMAND: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleKind {
    #[default]
    Stationary,
    Moving,
}

/// Vertical cylinder standing on the ground plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub x: f64,
    pub y: f64,
    pub radius_m: f64,
    pub height_m: f64,
    #[serde(default)]
    pub kind: ObstacleKind,
}

impl Obstacle {
    pub fn stationary(x: f64, y: f64, radius_m: f64, height_m: f64) -> Self {
        Self {
            x,
            y,
            radius_m,
            height_m,
            kind: ObstacleKind::Stationary,
        }
    }

    pub fn moving(x: f64, y: f64, radius_m: f64, height_m: f64) -> Self {
        Self {
            kind: ObstacleKind::Moving,
            ..Self::stationary(x, y, radius_m, height_m)
        }
    }

    /// The cylinder's axis from the ground to its top.
    pub fn axis(&self) -> Segment {
        Segment::new(
            Point3::new(self.x, self.y, 0.0),
            Point3::new(self.x, self.y, self.height_m.max(0.0)),
        )
    }

    /// Signed distance from `point` to the cylinder surface; negative inside.
    pub fn clearance(&self, point: &Point3) -> f64 {
        self.axis().distance_to_point(point) - self.radius_m
    }

    pub fn contains(&self, point: &Point3) -> bool {
        self.clearance(point) < 0.0
    }

    pub fn is_stationary(&self) -> bool {
        self.kind == ObstacleKind::Stationary
    }
}

/// A route entry: either part of the permanent mission or a planner detour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub position: Point3,
    /// Inserted by the planner rather than part of the mission.
    pub inserted: bool,
    /// Mission command payload, passed through untouched.
    #[serde(default)]
    pub command: serde_json::Value,
}

impl Waypoint {
    pub fn permanent(position: Point3, command: serde_json::Value) -> Self {
        Self {
            position,
            inserted: false,
            command,
        }
    }

    pub fn detour(position: Point3) -> Self {
        Self {
            position,
            inserted: true,
            command: serde_json::json!({ "command": NAV_WAYPOINT_COMMAND }),
        }
    }
}

/// Latest vehicle state in the local frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehiclePose {
    pub position: Point3,
    pub heading: Point3,
    pub speed_mps: f64,
}

/// Heading and elapsed time carried from the end of one leg into the next.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegBaton {
    pub heading: Point3,
    pub time_s: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obstacle_clearance_is_measured_from_the_axis() {
        let obstacle = Obstacle::stationary(0.0, 0.0, 10.0, 50.0);
        assert!((obstacle.clearance(&Point3::new(15.0, 0.0, 20.0)) - 5.0).abs() < 1e-9);
        assert!(obstacle.contains(&Point3::new(3.0, 4.0, 49.0)));
        // Above the top the distance is taken to the top of the axis.
        assert!(!obstacle.contains(&Point3::new(0.0, 0.0, 61.0)));
        assert!(obstacle.contains(&Point3::new(0.0, 0.0, 59.0)));
    }

    #[test]
    fn detour_waypoints_carry_nav_waypoint_command() {
        let wp = Waypoint::detour(Point3::new(1.0, 2.0, 3.0));
        assert!(wp.inserted);
        assert_eq!(wp.command["command"], 16);
    }
}
