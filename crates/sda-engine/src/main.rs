//! Reference replanning scenario.
//!
//! Flies a three-waypoint mission past a tall obstacle and prints the
//! replanned route as geodetic JSON.
//!
//! Usage:
//!   cargo run -p sda-engine --bin sda-replan -- --constrain --seed 7

use anyhow::Result;
use clap::Parser;
use sda_core::models::NAV_WAYPOINT_COMMAND;
use sda_core::{Geofence, Obstacle, Point3, Waypoint};
use sda_engine::{EngineConfig, EnuProjection, SdaEngine};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Irvine coordinates (mission origin)
const ORIGIN_LAT: f64 = 33.6846;
const ORIGIN_LON: f64 = -117.8265;
const HOME_ALTITUDE_M: f64 = 20.0;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replan a reference mission around an obstacle")]
struct Args {
    /// Enforce the minimum turn radius while searching
    #[arg(long)]
    constrain: bool,

    /// Round detour corners into fillets
    #[arg(long)]
    round: bool,

    /// Minimum turn radius in meters (defaults to SDA_TURN_RADIUS_M or 40)
    #[arg(long)]
    turn_radius: Option<f64>,

    /// Search timeout per leg, seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// RNG seed for a repeatable search
    #[arg(long)]
    seed: Option<u64>,

    /// Print the local-frame route instead of lat/lon
    #[arg(long)]
    local: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("sda_engine=debug".parse()?))
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::from_env();
    config.planner.constrain |= args.constrain;
    config.round_corners |= args.round;
    if let Some(radius) = args.turn_radius {
        config.planner.min_turn_radius_m = radius;
        config.rounding.turn_radius_m = radius;
    }
    if let Some(timeout) = args.timeout {
        config.planner.timeout_s = timeout;
    }
    if args.seed.is_some() {
        config.planner.seed = args.seed;
    }
    config.planner.validate()?;

    let projection = Arc::new(EnuProjection::new(ORIGIN_LAT, ORIGIN_LON, HOME_ALTITUDE_M));
    let engine = SdaEngine::new(config, projection);

    let command = serde_json::json!({ "command": NAV_WAYPOINT_COMMAND });
    engine.load_mission(vec![
        Waypoint::permanent(Point3::new(0.0, 100.0, 80.0), command.clone()),
        Waypoint::permanent(Point3::new(300.0, 100.0, 90.0), command.clone()),
        Waypoint::permanent(Point3::new(300.0, 350.0, 90.0), command),
    ]);
    engine.update_obstacles(vec![Obstacle::stationary(150.0, 100.0, 20.0, 200.0)]);
    engine.set_geofence(Some(Geofence::rectangle(-50.0, 0.0, 450.0, 400.0)?));
    engine.enable();

    tracing::info!("Planning reference mission...");
    let report = engine.plan(0, 1).await?;
    for leg in &report.legs {
        tracing::info!(
            "Leg into waypoint {}: {:?} ({} detour points, {} nodes)",
            leg.ordinal,
            leg.status,
            leg.detour.len(),
            leg.stats.nodes
        );
    }

    let output = if args.local {
        serde_json::to_string_pretty(&engine.current_route())?
    } else {
        serde_json::to_string_pretty(&engine.current_route_geodetic())?
    };
    println!("{}", output);
    Ok(())
}
