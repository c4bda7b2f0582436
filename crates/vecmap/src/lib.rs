//! Line-segment vector map.
//!
//! Loads a prior map of the environment as an ordered set of 2D line
//! segments and answers the two geometric queries the localizer and
//! planner need: ray/segment intersection, and minimum clearance between a
//! candidate edge and the map.

use nalgebra::Vector2;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VecMapError {
    #[error("failed to read map file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed map line {line_no} in {path}: {text:?}")]
    MalformedLine {
        path: String,
        line_no: usize,
        text: String,
    },
}

/// A 2D line segment in map frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub p0: Vector2<f64>,
    pub p1: Vector2<f64>,
}

impl LineSegment {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            p0: Vector2::new(x0, y0),
            p1: Vector2::new(x1, y1),
        }
    }

    pub fn length(&self) -> f64 {
        (self.p1 - self.p0).norm()
    }

    pub fn is_degenerate(&self) -> bool {
        self.length() < 1e-9
    }

    /// Unit normal to the segment (rotate the direction vector by +90deg).
    /// `None` for a degenerate (zero-length) segment.
    pub fn unit_normal(&self) -> Option<Vector2<f64>> {
        let d = self.p1 - self.p0;
        let len = d.norm();
        if len < 1e-9 {
            return None;
        }
        Some(Vector2::new(-d.y, d.x) / len)
    }

    /// The segment offset by `dist` along its unit normal, forming a line
    /// parallel to `self` at perpendicular distance `dist`.
    pub fn offset(&self, dist: f64) -> Option<LineSegment> {
        let n = self.unit_normal()?;
        Some(LineSegment {
            p0: self.p0 + n * dist,
            p1: self.p1 + n * dist,
        })
    }

    /// Closest point on the (clamped) segment to `point`.
    pub fn closest_point(&self, point: Vector2<f64>) -> Vector2<f64> {
        let d = self.p1 - self.p0;
        let len_sq = d.norm_squared();
        if len_sq < 1e-12 {
            return self.p0;
        }
        let t = ((point - self.p0).dot(&d) / len_sq).clamp(0.0, 1.0);
        self.p0 + d * t
    }

    pub fn distance_to_point(&self, point: Vector2<f64>) -> f64 {
        (self.closest_point(point) - point).norm()
    }

    /// Parametric line-line intersection via the standard determinant test.
    /// Returns `None` for parallel/degenerate input or when the intersection
    /// falls outside either segment's `[0, 1]` parameter range.
    pub fn intersection(&self, other: &LineSegment) -> Option<Vector2<f64>> {
        let (x1, y1) = (self.p0.x, self.p0.y);
        let (x2, y2) = (self.p1.x, self.p1.y);
        let (x3, y3) = (other.p0.x, other.p0.y);
        let (x4, y4) = (other.p1.x, other.p1.y);

        let denom = (x1 - x2) * (y3 - y4) - (y1 - y2) * (x3 - x4);
        if denom.abs() < 1e-12 {
            return None;
        }

        let t = ((x1 - x3) * (y3 - y4) - (y1 - y3) * (x3 - x4)) / denom;
        let u = ((x1 - x3) * (y1 - y2) - (y1 - y3) * (x1 - x2)) / denom;

        if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
            Some(Vector2::new(x1 + t * (x2 - x1), y1 + t * (y2 - y1)))
        } else {
            None
        }
    }

    /// Minimum distance between this segment and `other`, treating both as
    /// finite (clamped) segments. Zero if they intersect or touch.
    pub fn distance_to_segment(&self, other: &LineSegment) -> f64 {
        if self.intersection(other).is_some() {
            return 0.0;
        }
        let candidates = [
            other.distance_to_point(self.p0),
            other.distance_to_point(self.p1),
            self.distance_to_point(other.p0),
            self.distance_to_point(other.p1),
        ];
        candidates.into_iter().fold(f64::INFINITY, f64::min)
    }
}

/// An ordered, immutable set of line segments forming a 2D prior map.
#[derive(Debug, Clone, Default)]
pub struct VectorMap {
    segments: Vec<LineSegment>,
}

impl VectorMap {
    pub fn from_segments(segments: Vec<LineSegment>) -> Self {
        Self { segments }
    }

    /// Load a map from the whitespace-separated-decimals text format:
    /// one segment `x0 y0 x1 y1` per non-empty, non-comment line.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VecMapError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.display().to_string();
        let contents = std::fs::read_to_string(path_ref).map_err(|source| VecMapError::Io {
            path: path_str.clone(),
            source,
        })?;
        Self::parse(&contents, &path_str)
    }

    fn parse(contents: &str, path: &str) -> Result<Self, VecMapError> {
        let mut segments = Vec::new();
        for (line_no, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(VecMapError::MalformedLine {
                    path: path.to_string(),
                    line_no: line_no + 1,
                    text: raw.to_string(),
                });
            }
            let parsed: Result<Vec<f64>, _> = fields.iter().map(|f| f.parse::<f64>()).collect();
            let coords = parsed.map_err(|_| VecMapError::MalformedLine {
                path: path.to_string(),
                line_no: line_no + 1,
                text: raw.to_string(),
            })?;
            segments.push(LineSegment::new(coords[0], coords[1], coords[2], coords[3]));
        }
        tracing::debug!(count = segments.len(), path, "loaded vector map");
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[LineSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Nearest intersection of `query` with any map segment, breaking ties
    /// by distance from `query.p0`.
    pub fn intersect(&self, query: &LineSegment) -> Option<Vector2<f64>> {
        self.segments
            .iter()
            .filter_map(|seg| seg.intersection(query))
            .min_by(|a, b| {
                let da = (a - query.p0).norm();
                let db = (b - query.p0).norm();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Minimum perpendicular distance from any map segment to `query`.
    /// Returns `f64::INFINITY` for an empty map.
    pub fn min_distance_from_line_to_map(&self, query: &LineSegment) -> f64 {
        self.segments
            .iter()
            .map(|seg| seg.distance_to_segment(query))
            .fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> VectorMap {
        VectorMap::from_segments(vec![
            LineSegment::new(0.0, 0.0, 1.0, 0.0),
            LineSegment::new(1.0, 0.0, 1.0, 1.0),
            LineSegment::new(1.0, 1.0, 0.0, 1.0),
            LineSegment::new(0.0, 1.0, 0.0, 0.0),
        ])
    }

    #[test]
    fn ray_cast_against_unit_square() {
        let map = unit_square();
        // Ray from (0.5, 0.5) pointing along +x, far enough to guarantee a hit.
        let ray = LineSegment::new(0.5, 0.5, 10.0, 0.5);
        let hit = map.intersect(&ray).expect("expected a hit");
        assert_relative_eq!(hit.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(hit.y, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn parallel_segments_do_not_intersect() {
        let a = LineSegment::new(0.0, 0.0, 1.0, 0.0);
        let b = LineSegment::new(0.0, 1.0, 1.0, 1.0);
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn degenerate_segment_has_no_normal() {
        let seg = LineSegment::new(1.0, 1.0, 1.0, 1.0);
        assert!(seg.is_degenerate());
        assert!(seg.unit_normal().is_none());
    }

    #[test]
    fn min_distance_to_blocking_corridor() {
        let map = VectorMap::from_segments(vec![LineSegment::new(0.5, -1.0, 0.5, 1.0)]);
        let edge = LineSegment::new(0.0, 0.0, 1.0, 0.0);
        let dist = map.min_distance_from_line_to_map(&edge);
        assert_relative_eq!(dist, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn min_distance_nonzero_when_clear() {
        let map = unit_square();
        let edge = LineSegment::new(0.4, 0.5, 0.6, 0.5);
        let dist = map.min_distance_from_line_to_map(&edge);
        assert!(dist > 0.35 && dist < 0.41);
    }

    #[test]
    fn load_parses_segments_and_skips_comments() {
        let text = "# a comment\n0 0 1 0\n\n1 0 1 1\n";
        let map = VectorMap::parse(text, "test").unwrap();
        assert_eq!(map.segments().len(), 2);
    }

    #[test]
    fn load_rejects_malformed_line() {
        let text = "0 0 1\n";
        let err = VectorMap::parse(text, "test").unwrap_err();
        assert!(matches!(err, VecMapError::MalformedLine { .. }));
    }
}
