//! Probabilistic obstacle and geofence model.
//!
//! Every policy answers the same question: how likely is it that a point in
//! space is unsafe at a given time. Callers compare the answer against a
//! collision threshold.

use crate::geometry::{Geofence, Point3};
use crate::models::Obstacle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPolicy {
    #[default]
    Static,
    Expanding,
    LinearInterp,
}

impl std::str::FromStr for ModelPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "expanding" => Ok(Self::Expanding),
            "linear_interp" | "linear-interp" | "linear" => Ok(Self::LinearInterp),
            other => Err(format!("unknown obstacle model '{}'", other)),
        }
    }
}

/// Obstacles and fence captured for one planning call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObstacleSnapshot {
    pub obstacles: Vec<Obstacle>,
    pub geofence: Option<Geofence>,
}

impl ObstacleSnapshot {
    pub fn new(obstacles: Vec<Obstacle>, geofence: Option<Geofence>) -> Self {
        Self {
            obstacles,
            geofence,
        }
    }

    fn outside_fence(&self, point: &Point3) -> bool {
        self.geofence
            .as_ref()
            .is_some_and(|fence| !fence.contains(point))
    }

    fn hits_obstacle(&self, point: &Point3, stationary_only: bool) -> bool {
        self.obstacles
            .iter()
            .filter(|obstacle| !stationary_only || obstacle.is_stationary())
            .any(|obstacle| obstacle.contains(point))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObstacleModel {
    /// Every obstacle blocks, as does anything outside the fence.
    Static(ObstacleSnapshot),
    /// Only obstacles tagged stationary block.
    Expanding(ObstacleSnapshot),
    /// Slot for time-interpolated moving obstacles. Time is not used by this
    /// policy; it applies the stationary test.
    LinearInterp(ObstacleSnapshot),
}

impl ObstacleModel {
    pub fn new(policy: ModelPolicy, snapshot: ObstacleSnapshot) -> Self {
        match policy {
            ModelPolicy::Static => Self::Static(snapshot),
            ModelPolicy::Expanding => Self::Expanding(snapshot),
            ModelPolicy::LinearInterp => Self::LinearInterp(snapshot),
        }
    }

    pub fn policy(&self) -> ModelPolicy {
        match self {
            Self::Static(_) => ModelPolicy::Static,
            Self::Expanding(_) => ModelPolicy::Expanding,
            Self::LinearInterp(_) => ModelPolicy::LinearInterp,
        }
    }

    pub fn snapshot(&self) -> &ObstacleSnapshot {
        match self {
            Self::Static(snapshot) | Self::Expanding(snapshot) | Self::LinearInterp(snapshot) => {
                snapshot
            }
        }
    }

    /// Probability in [0, 1] that `point` is unsafe. No current policy reads the time.
    pub fn probability(&self, point: &Point3, _time_s: f64) -> f64 {
        let blocked = match self {
            Self::Static(snapshot) => {
                snapshot.hits_obstacle(point, false) || snapshot.outside_fence(point)
            }
            Self::Expanding(snapshot) => {
                snapshot.hits_obstacle(point, true) || snapshot.outside_fence(point)
            }
            Self::LinearInterp(snapshot) => {
                snapshot.outside_fence(point) || snapshot.hits_obstacle(point, true)
            }
        };
        if blocked {
            1.0
        } else {
            0.0
        }
    }

    pub fn is_blocked(&self, point: &Point3, time_s: f64, threshold: f64) -> bool {
        self.probability(point, time_s) > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICIES: [ModelPolicy; 3] = [
        ModelPolicy::Static,
        ModelPolicy::Expanding,
        ModelPolicy::LinearInterp,
    ];

    fn snapshot() -> ObstacleSnapshot {
        ObstacleSnapshot::new(
            vec![
                Obstacle::stationary(150.0, 100.0, 20.0, 200.0),
                Obstacle::moving(300.0, 300.0, 15.0, 100.0),
            ],
            Some(Geofence::rectangle(0.0, 0.0, 400.0, 400.0).unwrap()),
        )
    }

    #[test]
    fn every_policy_blocks_inside_stationary_obstacle() {
        for policy in POLICIES {
            let model = ObstacleModel::new(policy, snapshot());
            let inside = Point3::new(155.0, 105.0, 80.0);
            assert!(
                model.is_blocked(&inside, 0.0, 0.9),
                "{:?} let a point inside the obstacle through",
                policy
            );
        }
    }

    #[test]
    fn every_policy_is_clear_outside_obstacles_inside_fence() {
        for policy in POLICIES {
            let model = ObstacleModel::new(policy, snapshot());
            assert_eq!(model.probability(&Point3::new(50.0, 50.0, 80.0), 3.0), 0.0);
        }
    }

    #[test]
    fn every_policy_blocks_outside_fence() {
        for policy in POLICIES {
            let model = ObstacleModel::new(policy, snapshot());
            assert_eq!(model.probability(&Point3::new(-5.0, 50.0, 80.0), 0.0), 1.0);
        }
    }

    #[test]
    fn only_static_policy_blocks_moving_obstacles() {
        let point = Point3::new(305.0, 300.0, 50.0);
        assert!(ObstacleModel::new(ModelPolicy::Static, snapshot()).is_blocked(&point, 0.0, 0.9));
        assert!(!ObstacleModel::new(ModelPolicy::Expanding, snapshot()).is_blocked(&point, 0.0, 0.9));
        assert!(
            !ObstacleModel::new(ModelPolicy::LinearInterp, snapshot()).is_blocked(&point, 0.0, 0.9)
        );
    }

    #[test]
    fn linear_interp_ignores_time() {
        let model = ObstacleModel::new(ModelPolicy::LinearInterp, snapshot());
        let point = Point3::new(150.0, 90.0, 10.0);
        assert_eq!(model.probability(&point, 0.0), model.probability(&point, 1e6));
    }

    #[test]
    fn no_fence_means_unbounded_airspace() {
        let model = ObstacleModel::new(ModelPolicy::Static, ObstacleSnapshot::default());
        assert_eq!(model.probability(&Point3::new(-1e5, 1e5, 0.0), 0.0), 0.0);
    }

    #[test]
    fn policy_parses_from_env_style_names() {
        assert_eq!("linear_interp".parse::<ModelPolicy>(), Ok(ModelPolicy::LinearInterp));
        assert_eq!(" Expanding ".parse::<ModelPolicy>(), Ok(ModelPolicy::Expanding));
        assert!("quantum".parse::<ModelPolicy>().is_err());
    }
}
