//! Planning orchestrator.
//!
//! Owns the working route and launches at most one planning worker at a time.
//! The worker runs on the blocking pool and hands its report back over a
//! oneshot channel; a listener task is the only code that writes planner
//! output into the route.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::projection::{GeoPoint, GeoWaypoint, MissionItem, ObstacleReport, Projection};
use crate::state::store::{
    detour_before, next_permanent_ordinal, permanent_positions, splice_leg, RouteStore,
};
use crate::worker::{run_job, LegTarget, PlanJob, PlanReport};
use sda_core::{Geofence, Obstacle, Point3, VehiclePose, Waypoint};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Position update from the autopilot link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub pose: VehiclePose,
    /// Route index the autopilot is currently flying toward.
    pub current_index: usize,
}

struct Shared {
    config: EngineConfig,
    projection: Arc<dyn Projection>,
    enabled: AtomicBool,
    epoch: AtomicU64,
    worker_active: AtomicBool,
    store: RouteStore,
    last_report: Mutex<Option<PlanReport>>,
    last_launch: Mutex<Option<Instant>>,
}

/// Releases the single-worker slot when the listener finishes, however it finishes.
struct WorkerSlot(Arc<Shared>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.worker_active.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct SdaEngine {
    shared: Arc<Shared>,
}

impl SdaEngine {
    pub fn new(config: EngineConfig, projection: Arc<dyn Projection>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                projection,
                enabled: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                worker_active: AtomicBool::new(false),
                store: RouteStore::new(),
                last_report: Mutex::new(None),
                last_launch: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn enable(&self) {
        if !self.shared.enabled.swap(true, Ordering::SeqCst) {
            tracing::info!("Sense-and-avoid planning enabled");
        }
    }

    /// Stops telemetry-triggered planning. A worker already running is left
    /// to finish, but its result is discarded.
    pub fn disable(&self) {
        let was_enabled = self.shared.enabled.swap(false, Ordering::SeqCst);
        let epoch = {
            let _route = self.shared.store.write_route();
            self.shared.store.clear_previous();
            self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };
        if was_enabled {
            tracing::info!("Sense-and-avoid planning disabled (epoch {})", epoch);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn is_planning(&self) -> bool {
        self.shared.worker_active.load(Ordering::SeqCst)
    }

    /// Replaces the route. A job started against the old mission is discarded
    /// when it reports, since its ordinals refer to the old waypoints.
    pub fn load_mission(&self, mission: Vec<Waypoint>) {
        let (count, epoch) = {
            let mut route = self.shared.store.write_route();
            let count = self.shared.store.replace_mission(&mut route, mission);
            (count, self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1)
        };
        tracing::info!(
            "Loaded mission with {} permanent waypoints (epoch {})",
            count,
            epoch
        );
    }

    pub fn load_mission_geodetic(&self, mission: &[MissionItem]) {
        let projection = &self.shared.projection;
        self.load_mission(
            mission
                .iter()
                .map(|item| projection.waypoint_to_local(item))
                .collect(),
        );
    }

    pub fn update_obstacles(&self, obstacles: Vec<Obstacle>) {
        tracing::debug!("Obstacle list replaced ({} obstacles)", obstacles.len());
        self.shared.store.set_obstacles(obstacles);
    }

    pub fn update_obstacles_geodetic(&self, reports: &[ObstacleReport]) {
        let projection = &self.shared.projection;
        self.update_obstacles(
            reports
                .iter()
                .map(|report| projection.obstacle_to_local(report))
                .collect(),
        );
    }

    pub fn set_geofence(&self, geofence: Option<Geofence>) {
        self.shared.store.set_geofence(geofence);
    }

    /// Fence given as geodetic vertices; altitude is ignored.
    pub fn set_geofence_geodetic(&self, vertices: &[GeoPoint]) -> Result<()> {
        let projection = &self.shared.projection;
        let local = vertices
            .iter()
            .map(|vertex| {
                let point = projection.to_local(vertex);
                [point.x, point.y]
            })
            .collect();
        self.set_geofence(Some(Geofence::new(local)?));
        Ok(())
    }

    pub fn current_route(&self) -> Vec<Waypoint> {
        self.shared.store.route()
    }

    pub fn current_route_geodetic(&self) -> Vec<GeoWaypoint> {
        let projection = &self.shared.projection;
        self.shared
            .store
            .read_route()
            .iter()
            .map(|waypoint| projection.waypoint_to_geodetic(waypoint))
            .collect()
    }

    pub fn last_report(&self) -> Option<PlanReport> {
        self.shared
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Plans legs `start_leg..=end_leg` and waits for the result. Leg `k`
    /// runs from permanent waypoint `k` to `k + 1`.
    pub async fn plan(&self, start_leg: usize, end_leg: usize) -> Result<PlanReport> {
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        let route = self.shared.store.route();
        let permanent = permanent_positions(&route);
        let legs = permanent.len().saturating_sub(1);
        if start_leg > end_leg || end_leg >= legs {
            return Err(EngineError::InvalidLegRange {
                start: start_leg,
                end: end_leg,
                legs,
            });
        }

        let start = permanent[start_leg];
        let targets = (start_leg + 1..=end_leg + 1)
            .map(|ordinal| LegTarget {
                ordinal,
                position: permanent[ordinal],
            })
            .collect();
        let handle = self.launch(
            epoch,
            &route,
            start,
            Point3::default(),
            self.shared.config.default_speed_mps,
            targets,
        )?;
        handle.await.map_err(|_| EngineError::WorkerLost)?
    }

    /// Starts a background replan from the vehicle pose when planning is
    /// enabled, no worker is running and the replan period has elapsed.
    /// Returns whether a job was launched. Never blocks.
    pub fn on_telemetry(&self, sample: TelemetrySample) -> bool {
        if !self.is_enabled() || self.is_planning() {
            return false;
        }
        {
            let last = self
                .shared
                .last_launch
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if (*last).is_some_and(|at| at.elapsed() < self.shared.config.replan_period()) {
                return false;
            }
        }

        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        let route = self.shared.store.route();
        let Some(first) = next_permanent_ordinal(&route, sample.current_index) else {
            return false;
        };
        let permanent = permanent_positions(&route);
        let last = (first + self.shared.config.lookahead_legs).min(permanent.len());
        let targets: Vec<LegTarget> = (first..last)
            .map(|ordinal| LegTarget {
                ordinal,
                position: permanent[ordinal],
            })
            .collect();
        if targets.is_empty() {
            return false;
        }

        let speed = if sample.pose.speed_mps > 0.0 {
            sample.pose.speed_mps
        } else {
            self.shared.config.default_speed_mps
        };
        match self.launch(
            epoch,
            &route,
            sample.pose.position,
            sample.pose.heading,
            speed,
            targets,
        ) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!("Telemetry replan skipped: {}", err);
                false
            }
        }
    }

    /// `epoch` must be read before `route` was copied, so a mission swapped
    /// in between is caught by the epoch check in `apply`.
    fn launch(
        &self,
        epoch: u64,
        route: &[Waypoint],
        start: Point3,
        heading: Point3,
        speed_mps: f64,
        targets: Vec<LegTarget>,
    ) -> Result<JoinHandle<Result<PlanReport>>> {
        if self
            .shared
            .worker_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::ConcurrentPlanRequested);
        }
        let slot = WorkerSlot(self.shared.clone());
        *self
            .shared
            .last_launch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());

        let existing = targets
            .iter()
            .map(|target| (target.ordinal, detour_before(route, target.ordinal)))
            .collect();
        let job = PlanJob {
            id: Uuid::new_v4(),
            epoch,
            start,
            heading,
            speed_mps,
            targets,
            snapshot: self.shared.store.snapshot(),
            previous: self.shared.store.previous_detours(),
            existing,
            config: self.shared.config.clone(),
        };
        tracing::info!(
            "Launching plan job {} over {} legs",
            job.id,
            job.targets.len()
        );

        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let report = run_job(job);
            let _ = tx.send(report);
        });

        let shared = self.shared.clone();
        Ok(tokio::spawn(async move {
            let _slot = slot;
            let report = rx.await.map_err(|_| {
                tracing::error!("Planning worker exited without a result");
                EngineError::WorkerLost
            })?;
            Ok(shared.apply(report))
        }))
    }
}

impl Shared {
    /// Writes accepted detours into the route, in leg order, unless the
    /// engine was disabled or a new mission was loaded after the job started.
    fn apply(&self, mut report: PlanReport) -> PlanReport {
        {
            let mut route = self.store.write_route();
            let epoch = self.epoch.load(Ordering::SeqCst);
            if report.epoch != epoch {
                tracing::warn!(
                    "Discarding plan job {} from epoch {} (now {})",
                    report.job_id,
                    report.epoch,
                    epoch
                );
            } else {
                for leg in report.accepted_legs() {
                    if splice_leg(&mut route, leg.ordinal, &leg.detour) {
                        self.store.remember_detour(leg.ordinal, leg.detour.clone());
                    } else {
                        tracing::warn!(
                            "Waypoint {} vanished from the route; leg not applied",
                            leg.ordinal
                        );
                    }
                }
                report.applied = true;
                tracing::debug!("Route now holds {} waypoints", route.len());
            }
        }

        *self
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report.clone());
        report
    }
}
