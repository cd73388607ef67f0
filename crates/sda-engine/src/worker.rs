//! One planning job: walk a run of legs with a heading/time baton.
//!
//! Runs on a blocking thread. The job owns copies of everything it reads, so
//! the engine can keep taking telemetry and obstacle updates while it runs.

use crate::config::EngineConfig;
use chrono::{DateTime, Utc};
use sda_core::rounding::round_path;
use sda_core::{
    LegBaton, LegOutcome, LegPlan, ObstacleModel, ObstacleSnapshot, Point3, RrtPlanner,
    SearchStats,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// End of one leg: a permanent waypoint, by ordinal, and where it is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegTarget {
    pub ordinal: usize,
    pub position: Point3,
}

#[derive(Debug, Clone)]
pub struct PlanJob {
    pub id: Uuid,
    pub epoch: u64,
    pub start: Point3,
    /// Heading at `start`; falls back to the first leg's direction when zero.
    pub heading: Point3,
    pub speed_mps: f64,
    pub targets: Vec<LegTarget>,
    pub snapshot: ObstacleSnapshot,
    pub previous: HashMap<usize, Vec<Point3>>,
    /// Detour each leg already flies, used when the leg is left unchanged.
    pub existing: HashMap<usize, Vec<Point3>>,
    pub config: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum LegStatus {
    /// A new detour was found.
    Replanned,
    /// The direct line is clear; any stale detour is removed.
    Cleared,
    /// The previous detour still flies clear.
    Reused,
    TimedOut,
    Failed(String),
}

impl LegStatus {
    /// Whether this leg's detour should be written into the route.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Replanned | Self::Cleared | Self::Reused)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegReport {
    pub ordinal: usize,
    pub status: LegStatus,
    pub detour: Vec<Point3>,
    pub stats: SearchStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub job_id: Uuid,
    pub epoch: u64,
    pub legs: Vec<LegReport>,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
    /// Set by the listener once the detours are in the route.
    pub applied: bool,
}

impl PlanReport {
    pub fn accepted_legs(&self) -> impl Iterator<Item = &LegReport> {
        self.legs.iter().filter(|leg| leg.status.is_accepted())
    }
}

pub fn run_job(job: PlanJob) -> PlanReport {
    let started = Instant::now();
    let legs = plan_legs(&job);
    let report = PlanReport {
        job_id: job.id,
        epoch: job.epoch,
        legs,
        elapsed_ms: started.elapsed().as_millis() as u64,
        completed_at: Utc::now(),
        applied: false,
    };
    tracing::info!(
        "Plan job {} finished {} legs in {} ms",
        report.job_id,
        report.legs.len(),
        report.elapsed_ms
    );
    report
}

fn plan_legs(job: &PlanJob) -> Vec<LegReport> {
    let Some(first) = job.targets.first() else {
        return Vec::new();
    };

    let mut config = job.config.planner.clone();
    if job.speed_mps > 0.0 {
        config.speed_mps = job.speed_mps;
    }
    let model = ObstacleModel::new(job.config.model_policy, job.snapshot.clone());
    let mut planner = match RrtPlanner::new(config, model) {
        Ok(planner) => planner,
        Err(err) => {
            tracing::error!("Plan job {} rejected its planner config: {}", job.id, err);
            return job
                .targets
                .iter()
                .map(|target| LegReport {
                    ordinal: target.ordinal,
                    status: LegStatus::Failed(err.to_string()),
                    detour: Vec::new(),
                    stats: SearchStats::default(),
                })
                .collect();
        }
    };

    let initial_heading = if job.heading.flatten().norm() > sda_core::geometry::EPSILON {
        job.heading.unit()
    } else {
        (first.position - job.start).unit()
    };
    let mut baton = LegBaton {
        heading: initial_heading,
        time_s: 0.0,
    };
    let mut start = job.start;
    let mut reports = Vec::with_capacity(job.targets.len());

    for target in &job.targets {
        let previous = job
            .previous
            .get(&target.ordinal)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let existing = job
            .existing
            .get(&target.ordinal)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        tracing::debug!(
            "Planning leg into waypoint {} from ({:.1}, {:.1}, {:.1})",
            target.ordinal,
            start.x,
            start.y,
            start.z
        );

        let report = match planner.plan_leg(start, target.position, previous, baton) {
            Ok(LegOutcome::Found(plan)) => {
                let plan = maybe_round(&planner, &job.config, start, target.position, baton, plan);
                baton = plan.arrival;
                LegReport {
                    ordinal: target.ordinal,
                    status: if plan.reused_previous {
                        LegStatus::Reused
                    } else if plan.detour.is_empty() {
                        LegStatus::Cleared
                    } else {
                        LegStatus::Replanned
                    },
                    detour: plan.detour,
                    stats: plan.stats,
                }
            }
            Ok(LegOutcome::TimedOut(stats)) => {
                baton = kept_arrival(&planner, start, existing, target.position, baton);
                LegReport {
                    ordinal: target.ordinal,
                    status: LegStatus::TimedOut,
                    detour: Vec::new(),
                    stats,
                }
            }
            Err(err) => {
                tracing::error!("Leg into waypoint {} failed: {}", target.ordinal, err);
                baton = kept_arrival(&planner, start, existing, target.position, baton);
                LegReport {
                    ordinal: target.ordinal,
                    status: LegStatus::Failed(err.to_string()),
                    detour: Vec::new(),
                    stats: SearchStats::default(),
                }
            }
        };
        reports.push(report);
        start = target.position;
    }
    reports
}

/// Baton for a leg left unchanged: the vehicle flies `start`, the detour the
/// route already holds for the leg, then `goal`.
fn kept_arrival(
    planner: &RrtPlanner,
    start: Point3,
    kept: &[Point3],
    goal: Point3,
    baton: LegBaton,
) -> LegBaton {
    let speed = planner.config().speed_mps;
    let mut arrival = baton;
    let mut from = start;
    for to in kept.iter().copied().chain(std::iter::once(goal)) {
        let heading = (to - from).unit();
        if heading.norm() > 0.0 {
            arrival.heading = heading;
        }
        if speed > 0.0 {
            arrival.time_s += from.distance(&to) / speed;
        }
        from = to;
    }
    arrival
}

/// Fillets the detour corners when enabled and the result still flies clear.
fn maybe_round(
    planner: &RrtPlanner,
    config: &EngineConfig,
    start: Point3,
    goal: Point3,
    baton: LegBaton,
    plan: LegPlan,
) -> LegPlan {
    if !config.round_corners || plan.detour.is_empty() || plan.reused_previous {
        return plan;
    }

    let mut path = Vec::with_capacity(plan.detour.len() + 2);
    path.push(start);
    path.extend_from_slice(&plan.detour);
    path.push(goal);
    let rounded = round_path(&path, &config.rounding);

    match planner.simulate(&rounded, baton) {
        Some(arrival) if rounded.len() >= 2 => {
            let detour = rounded[1..rounded.len() - 1].to_vec();
            tracing::debug!(
                "Rounded {} detour corners into {} waypoints",
                plan.detour.len(),
                detour.len()
            );
            LegPlan {
                detour,
                arrival,
                ..plan
            }
        }
        _ => {
            tracing::debug!("Rounded detour collides; keeping sharp corners");
            plan
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sda_core::{Geofence, Obstacle};

    fn job(obstacles: Vec<Obstacle>, targets: Vec<LegTarget>) -> PlanJob {
        let mut config = EngineConfig::default();
        config.planner.min_turn_radius_m = 10.0;
        config.planner.timeout_s = 10.0;
        config.planner.seed = Some(4);
        PlanJob {
            id: Uuid::new_v4(),
            epoch: 0,
            start: Point3::new(100.0, 100.0, 80.0),
            heading: Point3::default(),
            speed_mps: 16.0,
            targets,
            snapshot: ObstacleSnapshot::new(
                obstacles,
                Some(Geofence::rectangle(0.0, 0.0, 400.0, 400.0).unwrap()),
            ),
            previous: HashMap::new(),
            existing: HashMap::new(),
            config,
        }
    }

    #[test]
    fn clear_legs_report_cleared_with_no_detour() {
        let report = run_job(job(
            Vec::new(),
            vec![
                LegTarget { ordinal: 1, position: Point3::new(200.0, 100.0, 80.0) },
                LegTarget { ordinal: 2, position: Point3::new(200.0, 200.0, 80.0) },
            ],
        ));
        assert_eq!(report.legs.len(), 2);
        for leg in &report.legs {
            assert_eq!(leg.status, LegStatus::Cleared);
            assert!(leg.detour.is_empty());
        }
        assert!(!report.applied);
    }

    #[test]
    fn blocked_leg_is_replanned_and_following_leg_cleared() {
        let report = run_job(job(
            vec![Obstacle::stationary(150.0, 100.0, 20.0, 200.0)],
            vec![
                LegTarget { ordinal: 1, position: Point3::new(300.0, 100.0, 90.0) },
                LegTarget { ordinal: 2, position: Point3::new(300.0, 300.0, 90.0) },
            ],
        ));
        assert_eq!(report.legs[0].status, LegStatus::Replanned);
        assert!(!report.legs[0].detour.is_empty());
        assert_eq!(report.legs[1].status, LegStatus::Cleared);
    }

    #[test]
    fn unreachable_target_times_out_without_detour() {
        let mut job = job(
            vec![Obstacle::stationary(300.0, 100.0, 30.0, 200.0)],
            vec![LegTarget { ordinal: 1, position: Point3::new(300.0, 100.0, 90.0) }],
        );
        job.config.planner.timeout_s = 0.5;
        let report = run_job(job);
        assert_eq!(report.legs[0].status, LegStatus::TimedOut);
        assert!(report.legs[0].detour.is_empty());
        assert!(report.accepted_legs().next().is_none());
    }

    #[test]
    fn timed_out_leg_does_not_stop_the_next_leg() {
        // The first target sits inside a small obstacle: unreachable, but the
        // second leg can still leave from it.
        let mut job = job(
            vec![
                Obstacle::stationary(300.0, 100.0, 3.0, 200.0),
                Obstacle::stationary(300.0, 200.0, 20.0, 200.0),
            ],
            vec![
                LegTarget { ordinal: 1, position: Point3::new(300.0, 100.0, 90.0) },
                LegTarget { ordinal: 2, position: Point3::new(300.0, 300.0, 90.0) },
            ],
        );
        job.config.planner.timeout_s = 2.0;
        let report = run_job(job);
        assert_eq!(report.legs[0].status, LegStatus::TimedOut);
        assert!(report.legs[0].detour.is_empty());
        assert_eq!(report.legs[1].status, LegStatus::Replanned);
        assert!(!report.legs[1].detour.is_empty());
        let accepted: Vec<_> = report.accepted_legs().map(|leg| leg.ordinal).collect();
        assert_eq!(accepted, vec![2]);
    }

    #[test]
    fn kept_arrival_follows_the_existing_detour() {
        let planner = RrtPlanner::new(
            EngineConfig::default().planner,
            ObstacleModel::new(Default::default(), ObstacleSnapshot::default()),
        )
        .unwrap();
        let baton = LegBaton {
            heading: Point3::new(1.0, 0.0, 0.0),
            time_s: 2.0,
        };
        let start = Point3::new(0.0, 0.0, 50.0);
        let goal = Point3::new(160.0, 0.0, 50.0);

        let straight = kept_arrival(&planner, start, &[], goal, baton);
        assert!((straight.time_s - 12.0).abs() < 1e-9);

        // 0 -> (80, 60) -> (160, 0) is two 100 m legs at 16 m/s.
        let kept = [Point3::new(80.0, 60.0, 50.0)];
        let detoured = kept_arrival(&planner, start, &kept, goal, baton);
        assert!((detoured.time_s - (2.0 + 200.0 / 16.0)).abs() < 1e-9);
        assert!((detoured.heading.x - 0.8).abs() < 1e-9);
        assert!((detoured.heading.y + 0.6).abs() < 1e-9);
    }

    #[test]
    fn invalid_config_fails_every_leg() {
        let mut job = job(
            Vec::new(),
            vec![LegTarget { ordinal: 1, position: Point3::new(200.0, 100.0, 80.0) }],
        );
        job.config.planner.step_m = -1.0;
        let report = run_job(job);
        assert!(matches!(report.legs[0].status, LegStatus::Failed(_)));
    }

    #[test]
    fn empty_job_reports_no_legs() {
        let report = run_job(job(Vec::new(), Vec::new()));
        assert!(report.legs.is_empty());
    }
}
