//! Planner and rounding parameters.

use crate::error::{Result, SdaError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Length of a single tree extension.
    pub step_m: f64,
    pub min_turn_radius_m: f64,
    /// Grow curvature-constrained chains instead of straight steps.
    pub constrain: bool,
    pub timeout_s: f64,
    /// Probability above which a point counts as blocked.
    pub collision_threshold: f64,
    /// Spacing of the collision samples along an edge.
    pub collision_increment_m: f64,
    pub goal_bias: f64,
    pub history_bias: f64,
    pub nearest_k: usize,
    pub heading_tolerance_deg: f64,
    pub max_turn_iterations: usize,
    pub max_resample_attempts: usize,
    pub speed_mps: f64,
    /// Fixed seed for reproducible searches.
    pub seed: Option<u64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            step_m: 5.0,
            min_turn_radius_m: 50.0,
            constrain: true,
            timeout_s: 5.0,
            collision_threshold: 0.9,
            collision_increment_m: 5.0,
            goal_bias: 0.1,
            history_bias: 0.02,
            nearest_k: 10,
            heading_tolerance_deg: 4.0,
            max_turn_iterations: 200,
            max_resample_attempts: 100,
            speed_mps: 1.0,
            seed: None,
        }
    }
}

impl PlannerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_s.max(0.0))
    }

    pub fn heading_tolerance_rad(&self) -> f64 {
        self.heading_tolerance_deg.to_radians()
    }

    /// Returns every problem found, or Ok if the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if !(self.step_m.is_finite() && self.step_m > 0.0) {
            errors.push("step_m must be positive".to_string());
        }
        if !(self.min_turn_radius_m.is_finite() && self.min_turn_radius_m > 0.0) {
            errors.push("min_turn_radius_m must be positive".to_string());
        } else if self.step_m / 2.0 > self.min_turn_radius_m {
            errors.push(format!(
                "step_m {} is longer than the turning circle diameter {}",
                self.step_m,
                2.0 * self.min_turn_radius_m
            ));
        }
        if !(self.timeout_s.is_finite() && self.timeout_s > 0.0) {
            errors.push("timeout_s must be positive".to_string());
        }
        if !(self.collision_threshold > 0.0 && self.collision_threshold < 1.0) {
            errors.push("collision_threshold must lie strictly between 0 and 1".to_string());
        }
        if !(self.collision_increment_m.is_finite() && self.collision_increment_m > 0.0) {
            errors.push("collision_increment_m must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.goal_bias)
            || !(0.0..=1.0).contains(&self.history_bias)
            || self.goal_bias + self.history_bias > 1.0
        {
            errors.push("goal_bias and history_bias must be probabilities summing to at most 1".to_string());
        }
        if self.nearest_k == 0 {
            errors.push("nearest_k must be at least 1".to_string());
        }
        if self.max_turn_iterations == 0 {
            errors.push("max_turn_iterations must be at least 1".to_string());
        }
        if !self.speed_mps.is_finite() || self.speed_mps < 0.0 {
            errors.push("speed_mps must be non-negative".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SdaError::InvalidConfig(errors.join("; ")))
        }
    }
}

/// Corner rounding and simplification weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundingConfig {
    pub turn_radius_m: f64,
    /// Parametric step used to sample each fillet curve.
    pub sample_step: f64,
    /// Fixed cost charged for every chord kept by the simplifier.
    pub chord_cost: f64,
    pub linear_weight: f64,
    pub angular_weight: f64,
}

impl Default for RoundingConfig {
    fn default() -> Self {
        Self {
            turn_radius_m: 40.0,
            sample_step: 0.1,
            chord_cost: 2.8,
            linear_weight: 2.0,
            angular_weight: 50.0,
        }
    }
}

impl RoundingConfig {
    pub fn curvature(&self) -> f64 {
        1.0 / self.turn_radius_m.max(f64::EPSILON)
    }
}
