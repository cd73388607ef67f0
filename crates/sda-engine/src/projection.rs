//! Local ENU frame <-> geodetic conversion.
//!
//! The planner works in meters east (x), north (y) and up (z) of a mission
//! origin. Everything crossing the engine boundary in lat/lon goes through a
//! [`Projection`].

use sda_core::{Obstacle, ObstacleKind, Point3, Waypoint};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    /// Altitude above mean sea level.
    pub altitude_m: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64, altitude_m: f64) -> Self {
        Self { lat, lon, altitude_m }
    }
}

/// Route entry in geodetic form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoWaypoint {
    pub point: GeoPoint,
    #[serde(default)]
    pub inserted: bool,
    #[serde(default)]
    pub command: serde_json::Value,
}

/// Mission items arrive in the same shape the route is reported in.
pub type MissionItem = GeoWaypoint;

/// Obstacle as reported by the detection source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstacleReport {
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
    pub height_m: f64,
    #[serde(default)]
    pub kind: ObstacleKind,
}

pub trait Projection: Send + Sync {
    fn to_local(&self, point: &GeoPoint) -> Point3;
    fn to_geodetic(&self, point: &Point3) -> GeoPoint;

    fn waypoint_to_local(&self, item: &MissionItem) -> Waypoint {
        Waypoint {
            position: self.to_local(&item.point),
            inserted: item.inserted,
            command: item.command.clone(),
        }
    }

    fn waypoint_to_geodetic(&self, waypoint: &Waypoint) -> GeoWaypoint {
        GeoWaypoint {
            point: self.to_geodetic(&waypoint.position),
            inserted: waypoint.inserted,
            command: waypoint.command.clone(),
        }
    }

    /// Obstacle heights are measured from the ground, so only x/y are projected.
    fn obstacle_to_local(&self, report: &ObstacleReport) -> Obstacle {
        let center = self.to_local(&GeoPoint::new(report.lat, report.lon, 0.0));
        Obstacle {
            x: center.x,
            y: center.y,
            radius_m: report.radius_m,
            height_m: report.height_m,
            kind: report.kind,
        }
    }
}

/// Meters per degree of latitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lat(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_132.954 - 559.822 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
        - 0.0023 * (6.0 * lat_rad).cos()
}

/// Meters per degree of longitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos() + 0.118 * (5.0 * lat_rad).cos()
}

/// Flat-earth tangent plane around a fixed origin.
///
/// Scale factors are evaluated once at the origin latitude; that is accurate
/// to well under a meter over the few kilometers a mission covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnuProjection {
    pub origin_lat: f64,
    pub origin_lon: f64,
    /// Home altitude; local z = 0 sits here.
    pub base_altitude_m: f64,
    meters_per_deg_lat: f64,
    meters_per_deg_lon: f64,
}

impl EnuProjection {
    pub fn new(origin_lat: f64, origin_lon: f64, base_altitude_m: f64) -> Self {
        Self {
            origin_lat,
            origin_lon,
            base_altitude_m,
            meters_per_deg_lat: meters_per_deg_lat(origin_lat).max(1e-9),
            meters_per_deg_lon: meters_per_deg_lon(origin_lat).max(1e-9),
        }
    }
}

impl Projection for EnuProjection {
    fn to_local(&self, point: &GeoPoint) -> Point3 {
        Point3::new(
            (point.lon - self.origin_lon) * self.meters_per_deg_lon,
            (point.lat - self.origin_lat) * self.meters_per_deg_lat,
            point.altitude_m - self.base_altitude_m,
        )
    }

    fn to_geodetic(&self, point: &Point3) -> GeoPoint {
        GeoPoint {
            lat: self.origin_lat + point.y / self.meters_per_deg_lat,
            lon: self.origin_lon + point.x / self.meters_per_deg_lon,
            altitude_m: point.z + self.base_altitude_m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection() -> EnuProjection {
        EnuProjection::new(33.6846, -117.8265, 20.0)
    }

    #[test]
    fn origin_maps_to_base_altitude() {
        let local = projection().to_local(&GeoPoint::new(33.6846, -117.8265, 20.0));
        assert!(local.norm() < 1e-9);
    }

    #[test]
    fn local_and_geodetic_round_trip() {
        let proj = projection();
        let local = Point3::new(250.0, -120.0, 80.0);
        let back = proj.to_local(&proj.to_geodetic(&local));
        assert!(back.distance(&local) < 1e-6);
    }

    #[test]
    fn one_degree_latitude_is_about_111_km() {
        let proj = projection();
        let north = proj.to_local(&GeoPoint::new(34.6846, -117.8265, 20.0));
        assert!((north.y - 111_000.0).abs() < 1_000.0);
        assert!(north.x.abs() < 1e-6);
    }

    #[test]
    fn obstacle_reports_keep_their_dimensions() {
        let proj = projection();
        let geo = proj.to_geodetic(&Point3::new(150.0, 100.0, 0.0));
        let obstacle = proj.obstacle_to_local(&ObstacleReport {
            lat: geo.lat,
            lon: geo.lon,
            radius_m: 20.0,
            height_m: 200.0,
            kind: ObstacleKind::Moving,
        });
        assert!((obstacle.x - 150.0).abs() < 1e-6);
        assert!((obstacle.y - 100.0).abs() < 1e-6);
        assert_eq!(obstacle.radius_m, 20.0);
        assert!(!obstacle.is_stationary());
    }
}
