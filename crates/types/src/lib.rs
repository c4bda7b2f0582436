//! Shared types and message definitions for the navigation core.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Planar pose: position in meters, heading in radians.
///
/// Heading is kept wrapped to `(-PI, PI]`; use [`Pose2D::new`] rather than
/// constructing the struct literal directly when `theta` may be unwrapped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose2D {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta: wrap_angle(theta),
        }
    }

    pub fn origin() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            theta: 0.0,
        }
    }

    pub fn distance_to(&self, other: &Pose2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl Default for Pose2D {
    fn default() -> Self {
        Self::origin()
    }
}

/// Wrap an angle, in radians, to `(-PI, PI]`.
pub fn wrap_angle(angle: f64) -> f64 {
    let mut a = (angle + PI) % (2.0 * PI);
    if a <= 0.0 {
        a += 2.0 * PI;
    }
    a - PI
}

/// Body-frame velocity command: longitudinal/lateral velocity plus yaw rate.
///
/// `linear_y` is zero for a differential-drive or Ackermann chassis; it is
/// carried so the latency compensator's integrator is chassis-agnostic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    pub linear_x: f64,
    pub linear_y: f64,
    pub angular: f64,
}

impl Twist {
    pub fn new(linear_x: f64, linear_y: f64, angular: f64) -> Self {
        Self {
            linear_x,
            linear_y,
            angular,
        }
    }
}

/// A single laser range scan, as delivered by the external sensor transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaserScan {
    pub ranges: Vec<f32>,
    pub range_min: f32,
    pub range_max: f32,
    pub angle_min: f32,
    pub angle_max: f32,
    /// Seconds since an arbitrary epoch; monotone within one run.
    pub stamp: f64,
}

impl LaserScan {
    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }
}

/// A navigation goal in map frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NavGoal {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl NavGoal {
    pub fn as_pose(&self) -> Pose2D {
        Pose2D::new(self.x, self.y, self.theta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_angle_identity_in_range() {
        assert!((wrap_angle(0.3) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn wrap_angle_wraps_above_pi() {
        let wrapped = wrap_angle(PI + 0.1);
        assert!(wrapped > -PI && wrapped <= PI);
        assert!((wrapped - (-PI + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn wrap_angle_wraps_below_negative_pi() {
        let wrapped = wrap_angle(-PI - 0.2);
        assert!(wrapped > -PI && wrapped <= PI);
        assert!((wrapped - (PI - 0.2)).abs() < 1e-9);
    }

    #[test]
    fn pose_serde_roundtrip() {
        let pose = Pose2D::new(1.5, -2.5, PI / 4.0);
        let json = serde_json::to_string(&pose).unwrap();
        let decoded: Pose2D = serde_json::from_str(&json).unwrap();
        assert!((decoded.x - pose.x).abs() < 1e-9);
        assert!((decoded.y - pose.y).abs() < 1e-9);
        assert!((decoded.theta - pose.theta).abs() < 1e-9);
    }

    #[test]
    fn twist_default_is_stopped() {
        let twist = Twist::default();
        assert_eq!(twist.linear_x, 0.0);
        assert_eq!(twist.linear_y, 0.0);
        assert_eq!(twist.angular, 0.0);
    }

    #[test]
    fn nav_goal_as_pose() {
        let goal = NavGoal {
            x: 2.0,
            y: 3.0,
            theta: 1.0,
        };
        let pose = goal.as_pose();
        assert_eq!(pose.x, 2.0);
        assert_eq!(pose.y, 3.0);
    }
}
