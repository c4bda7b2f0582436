//! 2D rigid-transform and angle arithmetic.
//!
//! The navigation core works entirely in a single map frame, so this crate
//! carries only the composable transform primitive and the angle helpers
//! that the localizer and planner build on, not a multi-frame lookup tree.

use nalgebra::{Isometry2, Vector2};
use std::f64::consts::PI;
use types::Pose2D;

/// A 2D rigid body transform (translation + rotation).
#[derive(Debug, Clone, Copy)]
pub struct Transform2D {
    inner: Isometry2<f64>,
}

impl Transform2D {
    pub fn identity() -> Self {
        Self {
            inner: Isometry2::identity(),
        }
    }

    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            inner: Isometry2::new(Vector2::new(x, y), theta),
        }
    }

    pub fn from_pose(pose: &Pose2D) -> Self {
        Self::new(pose.x, pose.y, pose.theta)
    }

    pub fn to_pose(&self) -> Pose2D {
        Pose2D::new(
            self.inner.translation.x,
            self.inner.translation.y,
            self.inner.rotation.angle(),
        )
    }

    pub fn translation(&self) -> Vector2<f64> {
        self.inner.translation.vector
    }

    pub fn rotation(&self) -> f64 {
        self.inner.rotation.angle()
    }

    pub fn inverse(&self) -> Self {
        Self {
            inner: self.inner.inverse(),
        }
    }

    /// Compose transforms: self * other. If self is A->B and other is B->C,
    /// the result is A->C.
    pub fn compose(&self, other: &Transform2D) -> Transform2D {
        Transform2D {
            inner: self.inner * other.inner,
        }
    }

    pub fn transform_point(&self, point: Vector2<f64>) -> Vector2<f64> {
        self.inner.transform_point(&nalgebra::Point2::from(point)).coords
    }

    pub fn transform_pose(&self, pose: &Pose2D) -> Pose2D {
        let child = Isometry2::new(Vector2::new(pose.x, pose.y), pose.theta);
        let result = self.inner * child;
        Pose2D::new(
            result.translation.x,
            result.translation.y,
            result.rotation.angle(),
        )
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transform2D {
    type Output = Transform2D;
    fn mul(self, rhs: Transform2D) -> Transform2D {
        self.compose(&rhs)
    }
}

impl std::ops::Mul<&Transform2D> for &Transform2D {
    type Output = Transform2D;
    fn mul(self, rhs: &Transform2D) -> Transform2D {
        self.compose(rhs)
    }
}

/// Wrap an angle to `(-PI, PI]`.
pub fn normalize_angle(angle: f64) -> f64 {
    types::wrap_angle(angle)
}

/// Shortest signed angular difference from `a` to `b`, wrapped to `(-PI, PI]`.
pub fn angle_diff(a: f64, b: f64) -> f64 {
    normalize_angle(b - a)
}

/// Circular mean of angles weighted by `weights` (need not be normalized).
///
/// Returns `0.0` if the weighted resultant vector has near-zero magnitude
/// (e.g. an empty slice, or headings evenly spread around the circle).
pub fn circular_mean(angles: &[f64], weights: &[f64]) -> f64 {
    let (mut sin_sum, mut cos_sum) = (0.0, 0.0);
    for (&theta, &w) in angles.iter().zip(weights.iter()) {
        sin_sum += w * theta.sin();
        cos_sum += w * theta.cos();
    }
    if sin_sum.hypot(cos_sum) < 1e-12 {
        return 0.0;
    }
    sin_sum.atan2(cos_sum)
}
