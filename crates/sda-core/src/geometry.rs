//! Local-frame geometry: points, segments and polygons in meters.
//!
//! All coordinates are in a flat local frame (x east, y north, z up) produced by
//! the caller's projection. Everything here is pure.

use crate::error::{Result, SdaError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// Tolerance for zero-length and collinearity checks, in meters.
pub const EPSILON: f64 = 1e-6;

const MAX_SAMPLE_ATTEMPTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const ZERO: Point3 = Point3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Point on the ground plane.
    pub const fn planar(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn dot(&self, other: &Point3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Point3) -> Point3 {
        Point3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(&self, other: &Point3) -> f64 {
        (*self - *other).norm()
    }

    /// Horizontal distance, ignoring altitude.
    pub fn distance_xy(&self, other: &Point3) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Unit vector in the same direction, or the zero vector for a zero-length input.
    pub fn unit(&self) -> Point3 {
        let norm = self.norm();
        if norm < EPSILON {
            return Point3::ZERO;
        }
        *self * (1.0 / norm)
    }

    pub fn flatten(&self) -> Point3 {
        Point3::new(self.x, self.y, 0.0)
    }

    pub fn with_z(&self, z: f64) -> Point3 {
        Point3::new(self.x, self.y, z)
    }

    pub fn lerp(&self, other: &Point3, t: f64) -> Point3 {
        *self + (*other - *self) * t
    }

    /// Heading of the horizontal component, radians counter-clockwise from +x.
    pub fn azimuth(&self) -> f64 {
        self.y.atan2(self.x)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Point3 {
    type Output = Point3;

    fn add(self, rhs: Point3) -> Point3 {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3 {
    type Output = Point3;

    fn sub(self, rhs: Point3) -> Point3 {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Point3 {
    type Output = Point3;

    fn mul(self, rhs: f64) -> Point3 {
        Point3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Point3 {
    type Output = Point3;

    fn neg(self) -> Point3 {
        Point3::new(-self.x, -self.y, -self.z)
    }
}

/// Angle between two vectors in radians, zero if either is zero-length.
pub fn angle_between(a: &Point3, b: &Point3) -> f64 {
    let (ua, ub) = (a.unit(), b.unit());
    if ua == Point3::ZERO || ub == Point3::ZERO {
        return 0.0;
    }
    ua.dot(&ub).clamp(-1.0, 1.0).acos()
}

/// Closest points between two segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoints {
    pub on_first: Point3,
    pub on_second: Point3,
    pub distance: f64,
    /// The segments are parallel, so the closest pair is one of many.
    pub parallel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point3,
    pub end: Point3,
}

impl Segment {
    pub const fn new(start: Point3, end: Point3) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.start.distance(&self.end)
    }

    pub fn direction(&self) -> Point3 {
        self.end - self.start
    }

    /// Closest point of the segment to `point`, clamped to the endpoints.
    pub fn projection(&self, point: &Point3) -> Point3 {
        let dir = self.direction();
        let len2 = dir.dot(&dir);
        if len2 < EPSILON * EPSILON {
            return self.start;
        }
        let t = ((*point - self.start).dot(&dir) / len2).clamp(0.0, 1.0);
        self.start + dir * t
    }

    pub fn distance_to_point(&self, point: &Point3) -> f64 {
        self.projection(point).distance(point)
    }

    /// Closest points between this segment and `other`.
    ///
    /// Fails on a zero-length segment instead of producing NaN. Parallel segments
    /// resolve to a valid pair and are flagged.
    pub fn closest_points(&self, other: &Segment) -> Result<ClosestPoints> {
        let d1 = self.direction();
        let d2 = other.direction();
        let r = self.start - other.start;
        let a = d1.dot(&d1);
        let e = d2.dot(&d2);
        if a < EPSILON * EPSILON || e < EPSILON * EPSILON {
            return Err(SdaError::DegenerateGeometry(
                "closest points of a zero-length segment",
            ));
        }
        let b = d1.dot(&d2);
        let c = d1.dot(&r);
        let f = d2.dot(&r);
        let denom = a * e - b * b;
        let parallel = denom <= EPSILON * a * e;

        let mut s = if parallel {
            0.0
        } else {
            ((b * f - c * e) / denom).clamp(0.0, 1.0)
        };
        let mut t = (b * s + f) / e;
        if t < 0.0 {
            t = 0.0;
            s = (-c / a).clamp(0.0, 1.0);
        } else if t > 1.0 {
            t = 1.0;
            s = ((b - c) / a).clamp(0.0, 1.0);
        }

        let on_first = self.start + d1 * s;
        let on_second = other.start + d2 * t;
        Ok(ClosestPoints {
            on_first,
            on_second,
            distance: on_first.distance(&on_second),
            parallel,
        })
    }

    pub fn distance_to_segment(&self, other: &Segment) -> Result<f64> {
        Ok(self.closest_points(other)?.distance)
    }

    /// Whether the horizontal footprints of the two segments touch.
    pub fn intersects_2d(&self, other: &Segment) -> bool {
        segments_intersect_2d(
            (self.start.x, self.start.y),
            (self.end.x, self.end.y),
            (other.start.x, other.start.y),
            (other.end.x, other.end.y),
        )
    }

    /// Point where the horizontal footprints meet, on the ground plane.
    pub fn intersection_2d(&self, other: &Segment) -> Option<Point3> {
        if !self.intersects_2d(other) {
            return None;
        }
        let flat_self = Segment::new(self.start.flatten(), self.end.flatten());
        let flat_other = Segment::new(other.start.flatten(), other.end.flatten());
        match flat_self.closest_points(&flat_other) {
            Ok(closest) => Some(closest.on_first),
            // One footprint is a single point lying on the other.
            Err(_) if flat_self.length() < EPSILON => Some(flat_self.start),
            Err(_) => Some(flat_other.start),
        }
    }

    /// Points every `step_m` from the start, then the end point.
    pub fn samples(&self, step_m: f64) -> Vec<Point3> {
        let length = self.length();
        let step = step_m.max(EPSILON);
        let steps = (length / step).floor() as usize;
        let dir = self.direction().unit();
        let mut points: Vec<Point3> = (0..=steps)
            .map(|i| self.start + dir * (i as f64 * step))
            .collect();
        if points.last().map_or(true, |p| p.distance(&self.end) > EPSILON) {
            points.push(self.end);
        }
        points
    }
}

fn orient(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> f64 {
    (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
}

pub fn segments_intersect_2d(
    a1: (f64, f64),
    a2: (f64, f64),
    b1: (f64, f64),
    b2: (f64, f64),
) -> bool {
    fn within(a: f64, b: f64, value: f64) -> bool {
        let min = a.min(b) - EPSILON;
        let max = a.max(b) + EPSILON;
        value >= min && value <= max
    }

    fn on_segment(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> bool {
        within(p.0, q.0, r.0) && within(p.1, q.1, r.1)
    }

    let o1 = orient(a1, a2, b1);
    let o2 = orient(a1, a2, b2);
    let o3 = orient(b1, b2, a1);
    let o4 = orient(b1, b2, a2);

    if (o1.abs() <= EPSILON && on_segment(a1, a2, b1))
        || (o2.abs() <= EPSILON && on_segment(a1, a2, b2))
        || (o3.abs() <= EPSILON && on_segment(b1, b2, a1))
        || (o4.abs() <= EPSILON && on_segment(b1, b2, a2))
    {
        return true;
    }

    straddles(o1, o2) && straddles(o3, o4)
}

fn straddles(o1: f64, o2: f64) -> bool {
    (o1 > EPSILON && o2 < -EPSILON) || (o1 < -EPSILON && o2 > EPSILON)
}

/// No-fly boundary: a closed polygon on the ground plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    vertices: Vec<[f64; 2]>,
}

impl Geofence {
    /// Builds a fence from its vertices; a repeated closing vertex is dropped.
    pub fn new(mut vertices: Vec<[f64; 2]>) -> Result<Self> {
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() < 3 {
            return Err(SdaError::InvalidGeofence(format!(
                "polygon needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        if vertices.iter().any(|v| !v[0].is_finite() || !v[1].is_finite()) {
            return Err(SdaError::InvalidGeofence(
                "polygon vertices must be finite".to_string(),
            ));
        }
        Ok(Self { vertices })
    }

    /// Axis-aligned square fence, handy for tests and demos.
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        Self::new(vec![
            [min_x, min_y],
            [max_x, min_y],
            [max_x, max_y],
            [min_x, max_y],
        ])
    }

    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.vertices
    }

    /// Ray-casting containment test on the ground plane.
    pub fn contains(&self, point: &Point3) -> bool {
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = self.vertices[i];
            let [xj, yj] = self.vertices[j];
            if ((yi > point.y) != (yj > point.y))
                && (point.x < (xj - xi) * (point.y - yi) / (yj - yi) + xi)
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    fn edges(&self) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            ((a[0], a[1]), (b[0], b[1]))
        })
    }

    /// Whether the segment passes from the interior to the exterior of the fence.
    pub fn crosses(&self, segment: &Segment) -> bool {
        if self.contains(&segment.start) != self.contains(&segment.end) {
            return true;
        }
        let (s1, s2) = (
            (segment.start.x, segment.start.y),
            (segment.end.x, segment.end.y),
        );
        self.edges().any(|(e1, e2)| {
            straddles(orient(s1, s2, e1), orient(s1, s2, e2))
                && straddles(orient(e1, e2, s1), orient(e1, e2, s2))
        })
    }

    /// (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.vertices.iter().fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(min_x, min_y, max_x, max_y), v| {
                (min_x.min(v[0]), min_y.min(v[1]), max_x.max(v[0]), max_y.max(v[1]))
            },
        )
    }

    /// Uniform point inside the fence by rejection sampling over its bounds.
    ///
    /// Returns `None` for polygons with no usable area.
    pub fn sample_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Point3> {
        let (min_x, min_y, max_x, max_y) = self.bounds();
        if max_x - min_x < EPSILON || max_y - min_y < EPSILON {
            return None;
        }
        (0..MAX_SAMPLE_ATTEMPTS)
            .map(|_| {
                Point3::planar(
                    rng.random_range(min_x..max_x),
                    rng.random_range(min_y..max_y),
                )
            })
            .find(|candidate| self.contains(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn projection_clamps_to_endpoints() {
        let seg = Segment::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0));
        assert_eq!(seg.projection(&Point3::new(5.0, 3.0, 0.0)), Point3::new(5.0, 0.0, 0.0));
        assert_eq!(seg.projection(&Point3::new(-4.0, 1.0, 0.0)), seg.start);
        assert_eq!(seg.projection(&Point3::new(14.0, -2.0, 0.0)), seg.end);
        assert!(approx(seg.distance_to_point(&Point3::new(13.0, 4.0, 0.0)), 5.0));
    }

    #[test]
    fn projection_onto_zero_length_segment_is_its_point() {
        let p = Point3::new(3.0, 3.0, 3.0);
        let seg = Segment::new(p, p);
        assert_eq!(seg.projection(&Point3::new(9.0, 1.0, 0.0)), p);
    }

    #[test]
    fn closest_points_of_skew_segments() {
        let a = Segment::new(Point3::new(-1.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0));
        let b = Segment::new(Point3::new(0.0, -1.0, 2.0), Point3::new(0.0, 1.0, 2.0));
        let closest = a.closest_points(&b).unwrap();
        assert!(approx(closest.distance, 2.0));
        assert_eq!(closest.on_first, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(closest.on_second, Point3::new(0.0, 0.0, 2.0));
        assert!(!closest.parallel);
    }

    #[test]
    fn closest_points_clamp_beyond_segment_ends() {
        let a = Segment::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0));
        let b = Segment::new(Point3::new(3.0, -1.0, 0.0), Point3::new(3.0, 1.0, 0.0));
        let closest = a.closest_points(&b).unwrap();
        assert_eq!(closest.on_first, Point3::new(1.0, 0.0, 0.0));
        assert!(approx(closest.distance, 2.0));
    }

    #[test]
    fn parallel_segments_are_flagged_not_nan() {
        let a = Segment::new(Point3::new(0.0, 0.0, 0.0), Point3::new(4.0, 0.0, 0.0));
        let b = Segment::new(Point3::new(1.0, 2.0, 0.0), Point3::new(3.0, 2.0, 0.0));
        let closest = a.closest_points(&b).unwrap();
        assert!(closest.parallel);
        assert!(approx(closest.distance, 2.0));
        assert!(closest.on_first.is_finite() && closest.on_second.is_finite());
    }

    #[test]
    fn zero_length_segment_is_degenerate() {
        let p = Point3::new(1.0, 1.0, 1.0);
        let a = Segment::new(p, p);
        let b = Segment::new(Point3::ZERO, Point3::new(1.0, 0.0, 0.0));
        assert!(matches!(
            a.closest_points(&b),
            Err(SdaError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn crossing_footprints_intersect_at_their_meeting_point() {
        let a = Segment::new(Point3::new(0.0, 0.0, 50.0), Point3::new(10.0, 10.0, 80.0));
        let b = Segment::new(Point3::new(0.0, 10.0, 10.0), Point3::new(10.0, 0.0, 10.0));
        assert!(a.intersects_2d(&b));
        let hit = a.intersection_2d(&b).unwrap();
        assert!(approx(hit.x, 5.0) && approx(hit.y, 5.0) && hit.z == 0.0);

        let c = Segment::new(Point3::new(20.0, 0.0, 0.0), Point3::new(30.0, 0.0, 0.0));
        assert!(!a.intersects_2d(&c));
        assert!(a.intersection_2d(&c).is_none());
    }

    #[test]
    fn samples_cover_both_endpoints() {
        let seg = Segment::new(Point3::ZERO, Point3::new(12.0, 0.0, 0.0));
        let samples = seg.samples(5.0);
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0], Point3::ZERO);
        assert_eq!(samples[2], Point3::new(10.0, 0.0, 0.0));
        assert_eq!(samples[3], seg.end);
    }

    #[test]
    fn geofence_contains_and_crosses() {
        let fence = Geofence::rectangle(0.0, 0.0, 100.0, 100.0).unwrap();
        assert!(fence.contains(&Point3::new(50.0, 50.0, 500.0)));
        assert!(!fence.contains(&Point3::new(150.0, 50.0, 0.0)));

        let inside = Segment::new(Point3::new(10.0, 10.0, 0.0), Point3::new(90.0, 90.0, 0.0));
        let leaving = Segment::new(Point3::new(50.0, 50.0, 0.0), Point3::new(150.0, 50.0, 0.0));
        let through = Segment::new(Point3::new(-10.0, 50.0, 0.0), Point3::new(110.0, 50.0, 0.0));
        assert!(!fence.crosses(&inside));
        assert!(fence.crosses(&leaving));
        assert!(fence.crosses(&through));
    }

    #[test]
    fn concave_fence_detects_exit_and_reentry() {
        // U shape open at the top between x=40 and x=60.
        let fence = Geofence::new(vec![
            [0.0, 0.0],
            [100.0, 0.0],
            [100.0, 100.0],
            [60.0, 100.0],
            [60.0, 40.0],
            [40.0, 40.0],
            [40.0, 100.0],
            [0.0, 100.0],
        ])
        .unwrap();
        let across_notch =
            Segment::new(Point3::new(20.0, 80.0, 0.0), Point3::new(80.0, 80.0, 0.0));
        assert!(fence.contains(&across_notch.start) && fence.contains(&across_notch.end));
        assert!(fence.crosses(&across_notch));
    }

    #[test]
    fn geofence_rejects_too_few_vertices() {
        let err = Geofence::new(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]).unwrap_err();
        assert!(matches!(err, SdaError::InvalidGeofence(_)));
    }

    #[test]
    fn sampled_points_fall_inside_fence() {
        let fence = Geofence::new(vec![[0.0, 0.0], [100.0, 0.0], [0.0, 100.0]]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let p = fence.sample_point(&mut rng).unwrap();
            assert!(fence.contains(&p), "sample {:?} escaped the fence", p);
        }
    }

    #[test]
    fn angle_between_handles_zero_vectors() {
        let x = Point3::new(1.0, 0.0, 0.0);
        let y = Point3::new(0.0, 2.0, 0.0);
        assert!(approx(angle_between(&x, &y), std::f64::consts::FRAC_PI_2));
        assert_eq!(angle_between(&x, &Point3::ZERO), 0.0);
    }
}
