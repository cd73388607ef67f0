//! Working route, obstacle snapshot and previous-solution cache.

use dashmap::DashMap;
use sda_core::{Geofence, Obstacle, ObstacleSnapshot, Point3, Waypoint};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Route and obstacle state shared by the engine front-end and its listener.
///
/// Only the listener task writes planner output into the route; everything
/// else replaces state wholesale.
#[derive(Default)]
pub struct RouteStore {
    route: RwLock<Vec<Waypoint>>,
    snapshot: RwLock<ObstacleSnapshot>,
    /// Last accepted detour, keyed by the ordinal of the permanent waypoint it leads into.
    previous: DashMap<usize, Vec<Point3>>,
}

impl RouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self) -> Vec<Waypoint> {
        self.read_route().clone()
    }

    pub(crate) fn read_route(&self) -> RwLockReadGuard<'_, Vec<Waypoint>> {
        self.route.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn write_route(&self) -> RwLockWriteGuard<'_, Vec<Waypoint>> {
        self.route.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the route with a fresh mission. Inserted entries are dropped.
    pub fn load_mission(&self, mission: Vec<Waypoint>) -> usize {
        let mut route = self.write_route();
        self.replace_mission(&mut route, mission)
    }

    /// Same as [`RouteStore::load_mission`] for a caller already holding the
    /// route write lock.
    pub(crate) fn replace_mission(&self, route: &mut Vec<Waypoint>, mission: Vec<Waypoint>) -> usize {
        *route = mission.into_iter().filter(|wp| !wp.inserted).collect();
        self.previous.clear();
        route.len()
    }

    pub fn snapshot(&self) -> ObstacleSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_obstacles(&self, obstacles: Vec<Obstacle>) {
        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        snapshot.obstacles = obstacles;
    }

    pub fn set_geofence(&self, geofence: Option<Geofence>) {
        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        snapshot.geofence = geofence;
    }

    pub fn previous_detours(&self) -> HashMap<usize, Vec<Point3>> {
        self.previous
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn remember_detour(&self, ordinal: usize, detour: Vec<Point3>) {
        if detour.is_empty() {
            self.previous.remove(&ordinal);
        } else {
            self.previous.insert(ordinal, detour);
        }
    }

    pub fn clear_previous(&self) {
        self.previous.clear();
    }
}

/// Route index of the `ordinal`-th permanent waypoint.
pub fn permanent_index(route: &[Waypoint], ordinal: usize) -> Option<usize> {
    route
        .iter()
        .enumerate()
        .filter(|(_, wp)| !wp.inserted)
        .nth(ordinal)
        .map(|(index, _)| index)
}

/// Ordinal of the first permanent waypoint at or after route `index`.
pub fn next_permanent_ordinal(route: &[Waypoint], index: usize) -> Option<usize> {
    let before = route.iter().take(index).filter(|wp| !wp.inserted).count();
    route
        .iter()
        .skip(index)
        .any(|wp| !wp.inserted)
        .then_some(before)
}

pub fn permanent_positions(route: &[Waypoint]) -> Vec<Point3> {
    route
        .iter()
        .filter(|wp| !wp.inserted)
        .map(|wp| wp.position)
        .collect()
}

/// Route range of the inserted run immediately before the `ordinal`-th
/// permanent waypoint. Empty when the leg has no detour.
fn inserted_run(route: &[Waypoint], ordinal: usize) -> Option<Range<usize>> {
    let end = permanent_index(route, ordinal)?;
    let start = route[..end]
        .iter()
        .rposition(|wp| !wp.inserted)
        .map_or(0, |index| index + 1);
    Some(start..end)
}

/// Detour the route currently flies into the `ordinal`-th permanent waypoint.
pub fn detour_before(route: &[Waypoint], ordinal: usize) -> Vec<Point3> {
    inserted_run(route, ordinal)
        .map(|run| route[run].iter().map(|wp| wp.position).collect())
        .unwrap_or_default()
}

/// Replaces the inserted run immediately before the `ordinal`-th permanent
/// waypoint with `detour`. Returns false when the ordinal does not exist.
pub fn splice_leg(route: &mut Vec<Waypoint>, ordinal: usize, detour: &[Point3]) -> bool {
    let Some(run) = inserted_run(route, ordinal) else {
        return false;
    };
    route.splice(run, detour.iter().copied().map(Waypoint::detour));
    true
}
