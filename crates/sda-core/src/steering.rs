//! Curvature limits for a fixed-wing vehicle taking fixed-length steps.
//!
//! A step of length `d` along a circle of radius `R` subtends a chord; the
//! chord may deviate from the current heading by at most
//! `max_turn_angle = π/2 - acos((d/2)/R)`, and the heading at the end of the
//! chord is the circle's tangent there, `max_turn_heading` away from the
//! starting heading.

use crate::error::{Result, SdaError};
use crate::geometry::{angle_between, Point3, EPSILON};
use std::f64::consts::{PI, TAU};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Steering {
    step_m: f64,
    min_turn_radius_m: f64,
    max_turn_angle: f64,
    max_turn_heading: f64,
}

impl Steering {
    pub fn new(step_m: f64, min_turn_radius_m: f64) -> Result<Self> {
        if !(step_m.is_finite() && step_m > 0.0) {
            return Err(SdaError::InvalidConfig(format!(
                "step must be positive, got {}",
                step_m
            )));
        }
        if !(min_turn_radius_m.is_finite() && min_turn_radius_m > 0.0) {
            return Err(SdaError::InvalidConfig(format!(
                "turn radius must be positive, got {}",
                min_turn_radius_m
            )));
        }
        let half_chord = step_m / 2.0;
        if half_chord > min_turn_radius_m {
            return Err(SdaError::InvalidConfig(format!(
                "step {} does not fit a turning circle of radius {}",
                step_m, min_turn_radius_m
            )));
        }

        let max_turn_angle = PI / 2.0 - (half_chord / min_turn_radius_m).acos();

        // Chord end on a circle centred at (R, 0), starting at the origin heading +y.
        let end_x = step_m * max_turn_angle.sin();
        let end_y = step_m * max_turn_angle.cos();
        let max_turn_heading = end_y.atan2(min_turn_radius_m - end_x);

        Ok(Self {
            step_m,
            min_turn_radius_m,
            max_turn_angle,
            max_turn_heading,
        })
    }

    pub fn step(&self) -> f64 {
        self.step_m
    }

    pub fn min_turn_radius(&self) -> f64 {
        self.min_turn_radius_m
    }

    pub fn max_turn_angle(&self) -> f64 {
        self.max_turn_angle
    }

    pub fn max_turn_heading(&self) -> f64 {
        self.max_turn_heading
    }

    pub fn clamp_turn(&self, theta: f64) -> f64 {
        theta.clamp(-self.max_turn_angle, self.max_turn_angle)
    }

    /// Heading change that accompanies a chord deviation of `theta`.
    pub fn heading_change(&self, theta: f64) -> f64 {
        if self.max_turn_angle < EPSILON {
            return 0.0;
        }
        self.clamp_turn(theta) * self.max_turn_heading / self.max_turn_angle
    }

    /// Position and heading after one step turning by `theta` (clockwise positive).
    ///
    /// `climb` is the vertical share of the step in [-1, 1]; the horizontal
    /// share shrinks so the step length stays `step()`.
    pub fn turn(&self, position: Point3, heading: Point3, theta: f64, climb: f64) -> (Point3, Point3) {
        let theta = self.clamp_turn(theta);
        let climb = climb.clamp(-1.0, 1.0);
        let horizontal = (1.0 - climb * climb).sqrt();

        let mut planar = heading.flatten().unit();
        if planar == Point3::ZERO {
            planar = Point3::new(1.0, 0.0, 0.0);
        }

        let step_dir = rotate_xy(planar, theta);
        let new_position = position
            + step_dir * (self.step_m * horizontal)
            + Point3::new(0.0, 0.0, self.step_m * climb);

        let new_planar = rotate_xy(planar, self.heading_change(theta));
        let new_heading = Point3::new(new_planar.x * horizontal, new_planar.y * horizontal, climb);
        (new_position, new_heading)
    }
}

/// Rotates the horizontal part of `v` clockwise by `theta`; altitude untouched.
pub fn rotate_xy(v: Point3, theta: f64) -> Point3 {
    let (s, c) = theta.sin_cos();
    Point3::new(v.x * c + v.y * s, -v.x * s + v.y * c, v.z)
}

pub fn wrap_angle(theta: f64) -> f64 {
    let wrapped = (theta + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Clockwise turn needed to bring `heading` onto `direction`, in (-π, π].
pub fn signed_turn(heading: &Point3, direction: &Point3) -> f64 {
    wrap_angle(heading.azimuth() - direction.azimuth())
}

/// Whether `heading` at `position` points at `target` within `tolerance_rad`,
/// judged in the horizontal plane.
pub fn is_angled_towards(position: &Point3, heading: &Point3, target: &Point3, tolerance_rad: f64) -> bool {
    let direction = (*target - *position).flatten();
    let planar = heading.flatten();
    if direction.norm() < EPSILON || planar.norm() < EPSILON {
        return false;
    }
    angle_between(&planar, &direction) < tolerance_rad
}
