//! Engine configuration from environment.

use sda_core::{ModelPolicy, PlannerConfig, RoundingConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub planner: PlannerConfig,
    pub rounding: RoundingConfig,
    pub model_policy: ModelPolicy,
    /// Ground speed assumed until telemetry reports one.
    pub default_speed_mps: f64,
    /// Permanent waypoints planned ahead of the vehicle on each telemetry pass.
    pub lookahead_legs: usize,
    pub replan_period_ms: u64,
    /// Round detour corners into fillets before splicing.
    pub round_corners: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            planner: PlannerConfig {
                step_m: 5.0,
                min_turn_radius_m: 40.0,
                constrain: false,
                timeout_s: 4.0,
                speed_mps: 16.0,
                ..PlannerConfig::default()
            },
            rounding: RoundingConfig::default(),
            model_policy: ModelPolicy::Static,
            default_speed_mps: 16.0,
            lookahead_legs: 5,
            replan_period_ms: 1000,
            round_corners: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let planner = PlannerConfig {
            step_m: parse_env("SDA_STEP_M").unwrap_or(defaults.planner.step_m),
            min_turn_radius_m: parse_env("SDA_TURN_RADIUS_M")
                .unwrap_or(defaults.planner.min_turn_radius_m),
            timeout_s: parse_env("SDA_TIMEOUT_SECS").unwrap_or(defaults.planner.timeout_s),
            constrain: parse_env("SDA_CONSTRAIN").unwrap_or(defaults.planner.constrain),
            seed: parse_env("SDA_SEED").or(defaults.planner.seed),
            ..defaults.planner
        };
        let default_speed_mps = parse_env("SDA_SPEED_MPS").unwrap_or(defaults.default_speed_mps);

        Self {
            rounding: RoundingConfig {
                turn_radius_m: planner.min_turn_radius_m,
                ..defaults.rounding
            },
            planner: PlannerConfig {
                speed_mps: default_speed_mps,
                ..planner
            },
            model_policy: parse_env("SDA_MODEL").unwrap_or(defaults.model_policy),
            default_speed_mps,
            lookahead_legs: parse_env("SDA_LOOKAHEAD_LEGS").unwrap_or(defaults.lookahead_legs),
            replan_period_ms: parse_env("SDA_REPLAN_PERIOD_MS")
                .unwrap_or(defaults.replan_period_ms),
            round_corners: parse_env("SDA_ROUND_CORNERS").unwrap_or(defaults.round_corners),
        }
    }

    pub fn replan_period(&self) -> Duration {
        Duration::from_millis(self.replan_period_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
