//! Corner rounding with cubic Bezier fillets and optimal vertex selection.
//!
//! Each interior vertex of a polyline is replaced by two cubic Bezier curves
//! whose curvature stays under `1/R`. The sampled curves are then thinned by a
//! dynamic program that trades a fixed cost per kept chord against how far
//! each chord strays from the curve it replaces.

use crate::config::RoundingConfig;
use crate::geometry::{angle_between, Point3, Segment, EPSILON};
use serde::Serialize;

const FILLET_D: f64 = 1.1228;
const FILLET_H: f64 = 0.346;
const FILLET_G: f64 = 0.58;
const FILLET_K: f64 = 1.31;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CubicBezier {
    pub control: [Point3; 4],
}

impl CubicBezier {
    pub fn new(control: [Point3; 4]) -> Self {
        Self { control }
    }

    pub fn point_at(&self, t: f64) -> Point3 {
        let u = 1.0 - t;
        let [p0, p1, p2, p3] = self.control;
        p0 * (u * u * u) + p1 * (3.0 * u * u * t) + p2 * (3.0 * u * t * t) + p3 * (t * t * t)
    }

    /// Points at every `step` of the parameter, both ends included.
    pub fn sample(&self, step: f64) -> Vec<Point3> {
        let steps = (1.0 / step.max(EPSILON)).round().max(1.0) as usize;
        (0..=steps)
            .map(|i| self.point_at(i as f64 / steps as f64))
            .collect()
    }
}

/// Pair of fillets replacing the corner at `p2`, or `None` when the corner is
/// straight or too sharp for the adjacent legs to hold the curve.
pub fn vertex_fillets(p1: Point3, p2: Point3, p3: Point3, curvature: f64) -> Option<[CubicBezier; 2]> {
    let back = (p1 - p2).unit();
    let ahead = -(p3 - p2).unit();
    if back == Point3::ZERO || ahead == Point3::ZERO || curvature <= 0.0 {
        return None;
    }

    let deflection = back.dot(&ahead).clamp(-1.0, 1.0).acos();
    if deflection < EPSILON {
        return None;
    }
    let beta = deflection / 2.0;
    let cos_beta = beta.cos();

    let d = FILLET_D * beta.sin() / (curvature * cos_beta * cos_beta);
    let shortest_leg = p1.distance(&p2).min(p3.distance(&p2));
    if !d.is_finite() || d > shortest_leg / 2.0 {
        return None;
    }
    let h = FILLET_H * d;
    let g = FILLET_G * h;
    let k = FILLET_K * h * cos_beta;

    let b0 = p2 + back * d;
    let b1 = b0 - back * g;
    let b2 = b1 - back * h;
    let e3 = p2 - ahead * d;
    let e2 = e3 + ahead * g;
    let e1 = e2 + ahead * h;
    let diagonal = (e3 - b0).unit();
    let b3 = b2 + diagonal * k;
    let e0 = e1 - diagonal * k;

    Some([
        CubicBezier::new([b0, b1, b2, b3]),
        CubicBezier::new([e0, e1, e2, e3]),
    ])
}

/// Largest distance from the chord `i..j` to the points strictly between.
///
/// The distance profile is unimodal along a fillet, so a peak search suffices.
pub fn linear_error(points: &[Point3], i: usize, j: usize) -> f64 {
    if j < i + 3 {
        return 0.0;
    }
    let chord = Segment::new(points[i], points[j]);
    let distance = |k: usize| chord.distance_to_point(&points[k]);

    let (mut lo, mut hi) = (i + 1, j - 1);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if distance(mid) < distance(mid + 1) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    distance(lo)
}

/// Angle between the chord `i..j` and the path's own direction arriving at `j`.
pub fn angular_error(points: &[Point3], i: usize, j: usize) -> f64 {
    if j == 0 || j <= i {
        return 0.0;
    }
    let chord = points[j] - points[i];
    let local = points[j] - points[j - 1];
    angle_between(&chord, &local)
}

pub fn chord_error(points: &[Point3], i: usize, j: usize, config: &RoundingConfig) -> f64 {
    config.linear_weight * linear_error(points, i, j)
        + config.angular_weight * angular_error(points, i, j)
}

/// Indices of the cheapest vertex subsequence from the first to the last point.
///
/// `errors[i][j]` (with `j < i`) is the cost of jumping straight from vertex
/// `j` to vertex `i`; every kept chord also pays `chord_cost`.
pub fn select_vertices(errors: &[Vec<f64>], chord_cost: f64) -> Vec<usize> {
    let n = errors.len();
    if n <= 2 {
        return (0..n).collect();
    }

    let mut best = vec![f64::INFINITY; n];
    let mut choice = vec![0usize; n];
    best[0] = 0.0;
    for i in 1..n {
        for j in 0..i {
            let cost = best[j] + errors[i][j] + chord_cost;
            if cost < best[i] {
                best[i] = cost;
                choice[i] = j;
            }
        }
    }

    let mut selected = vec![n - 1];
    let mut current = n - 1;
    while current > 0 {
        current = choice[current];
        selected.push(current);
    }
    selected.reverse();
    selected
}

/// Thins `points` to the DP-optimal subsequence; endpoints are always kept.
pub fn simplify_points(points: &[Point3], config: &RoundingConfig) -> Vec<Point3> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let errors: Vec<Vec<f64>> = (0..points.len())
        .map(|i| (0..i).map(|j| chord_error(points, j, i, config)).collect())
        .collect();
    select_vertices(&errors, config.chord_cost)
        .into_iter()
        .map(|i| points[i])
        .collect()
}

/// Rounds every interior corner of `path` into simplified fillet points.
pub fn round_path(path: &[Point3], config: &RoundingConfig) -> Vec<Point3> {
    if path.len() < 3 {
        return path.to_vec();
    }

    fn push_distinct(out: &mut Vec<Point3>, point: Point3) {
        if out.last().map_or(true, |last| last.distance(&point) > EPSILON) {
            out.push(point);
        }
    }

    let mut rounded = vec![path[0]];
    for corner in path.windows(3) {
        match vertex_fillets(corner[0], corner[1], corner[2], config.curvature()) {
            Some(fillets) => {
                for fillet in fillets {
                    for point in simplify_points(&fillet.sample(config.sample_step), config) {
                        push_distinct(&mut rounded, point);
                    }
                }
            }
            None => push_distinct(&mut rounded, corner[1]),
        }
    }
    if let Some(last) = path.last() {
        push_distinct(&mut rounded, *last);
    }
    rounded
}
