//! Grid-lattice A* global planner.
//!
//! Searches a uniform 2D lattice rooted at the start pose for a shortest
//! collision-free path to a goal, against the same line-segment vector map
//! the localizer uses. Edges are validated not just at the center line but
//! across a clearance corridor on either side.

pub mod frontier;

use frontier::Frontier;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use types::Pose2D;
use vecmap::{LineSegment, VectorMap};

/// One of the eight king-move neighbor directions on the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborOffset {
    pub di: i32,
    pub dj: i32,
}

const NEIGHBOR_OFFSETS: [NeighborOffset; 8] = [
    NeighborOffset { di: 1, dj: 0 },
    NeighborOffset { di: -1, dj: 0 },
    NeighborOffset { di: 0, dj: 1 },
    NeighborOffset { di: 0, dj: -1 },
    NeighborOffset { di: 1, dj: 1 },
    NeighborOffset { di: 1, dj: -1 },
    NeighborOffset { di: -1, dj: 1 },
    NeighborOffset { di: -1, dj: -1 },
];

/// A descriptor for one of a node's lattice neighbors.
#[derive(Debug, Clone)]
pub struct NeighborDescriptor {
    pub i: i32,
    pub j: i32,
    pub key: String,
    pub edge_length: f64,
}

/// A lattice node, identified by integer index `(i, j)` with derived string
/// key `"i_j"`. Neighbor descriptors are populated lazily on first
/// expansion.
#[derive(Debug, Clone)]
pub struct GridNode {
    pub i: i32,
    pub j: i32,
    pub key: String,
    pub location: (f64, f64),
    pub g: f64,
    pub parent: Option<String>,
    pub neighbors: Option<Vec<NeighborDescriptor>>,
}

fn node_key(i: i32, j: i32) -> String {
    format!("{i}_{j}")
}

/// Grid-lattice A* global planner, keyed to a shared, read-only vector map.
pub struct GlobalPlanner {
    map: Arc<VectorMap>,
    resolution: f64,
    clearance_offset: f64,
    nav_map: HashMap<String, GridNode>,
    origin: Option<(f64, f64)>,
}

impl GlobalPlanner {
    pub fn new(map: Arc<VectorMap>, resolution: f64, clearance_offset: f64) -> Self {
        Self {
            map,
            resolution,
            clearance_offset,
            nav_map: HashMap::new(),
            origin: None,
        }
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn clearance_offset(&self) -> f64 {
        self.clearance_offset
    }

    fn location_of(&self, i: i32, j: i32) -> (f64, f64) {
        let (ox, oy) = self.origin.expect("origin set before use");
        (ox + i as f64 * self.resolution, oy + j as f64 * self.resolution)
    }

    fn index_of(&self, x: f64, y: f64) -> (i32, i32) {
        let (ox, oy) = self.origin.expect("origin set before use");
        (
            ((x - ox) / self.resolution).round() as i32,
            ((y - oy) / self.resolution).round() as i32,
        )
    }

    fn edge_valid(&self, a: (f64, f64), b: (f64, f64)) -> bool {
        let center = LineSegment::new(a.0, a.1, b.0, b.1);
        if center.is_degenerate() || self.map.intersect(&center).is_some() {
            return false;
        }
        for sign in [1.0, -1.0] {
            match center.offset(sign * self.clearance_offset) {
                Some(cushion) => {
                    if self.map.intersect(&cushion).is_some() {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }

    fn neighbors_of(&mut self, key: &str) -> Vec<NeighborDescriptor> {
        if let Some(existing) = self.nav_map.get(key).and_then(|n| n.neighbors.clone()) {
            return existing;
        }
        let (i, j) = {
            let node = &self.nav_map[key];
            (node.i, node.j)
        };
        let neighbors: Vec<NeighborDescriptor> = NEIGHBOR_OFFSETS
            .iter()
            .map(|offset| {
                let (ni, nj) = (i + offset.di, j + offset.dj);
                let edge_length = if offset.di != 0 && offset.dj != 0 {
                    self.resolution * std::f64::consts::SQRT_2
                } else {
                    self.resolution
                };
                NeighborDescriptor {
                    i: ni,
                    j: nj,
                    key: node_key(ni, nj),
                    edge_length,
                }
            })
            .collect();
        self.nav_map.get_mut(key).unwrap().neighbors = Some(neighbors.clone());
        neighbors
    }

    fn ensure_node(&mut self, i: i32, j: i32) -> String {
        let key = node_key(i, j);
        self.nav_map.entry(key.clone()).or_insert_with(|| GridNode {
            i,
            j,
            key: key.clone(),
            location: self.location_of(i, j),
            g: f64::INFINITY,
            parent: None,
            neighbors: None,
        });
        key
    }

    /// Plan a path from `start` to `goal`. Returns an ordered sequence of
    /// lattice node keys, or an empty vector if no path exists.
    ///
    /// The lattice origin is re-rooted at `start`, and the node map cleared,
    /// whenever `start` differs from the previous call's start.
    pub fn plan(&mut self, start: Pose2D, goal: Pose2D) -> Vec<String> {
        let start_origin = (start.x, start.y);
        if self.origin != Some(start_origin) {
            trace!(?start_origin, "lattice origin changed, node map cleared");
            self.origin = Some(start_origin);
            self.nav_map.clear();
        }

        let start_key = self.ensure_node(0, 0);
        self.nav_map.get_mut(&start_key).unwrap().g = 0.0;

        let goal_loc = (goal.x, goal.y);
        let heuristic = |loc: (f64, f64)| -> f64 {
            ((loc.0 - goal_loc.0).powi(2) + (loc.1 - goal_loc.1).powi(2)).sqrt()
        };

        let mut frontier = Frontier::new();
        frontier.push_or_update(&start_key, heuristic(self.location_of(0, 0)));

        while let Some((current_key, _)) = frontier.pop() {
            let (current_loc, current_g) = {
                let node = &self.nav_map[&current_key];
                (node.location, node.g)
            };

            if heuristic(current_loc) <= self.resolution {
                let path = self.reconstruct_path(&current_key);
                debug!(waypoints = path.len(), nodes = self.nav_map.len(), "path found");
                return path;
            }

            for neighbor in self.neighbors_of(&current_key) {
                let neighbor_loc = self.location_of(neighbor.i, neighbor.j);
                if !self.edge_valid(current_loc, neighbor_loc) {
                    continue;
                }
                let tentative_g = current_g + neighbor.edge_length;
                self.ensure_node(neighbor.i, neighbor.j);
                let existing_g = self.nav_map[&neighbor.key].g;
                if tentative_g < existing_g {
                    let node = self.nav_map.get_mut(&neighbor.key).unwrap();
                    node.g = tentative_g;
                    node.parent = Some(current_key.clone());
                    let f = tentative_g + heuristic(neighbor_loc);
                    frontier.push_or_update(&neighbor.key, f);
                }
            }
        }

        debug!(nodes = self.nav_map.len(), "frontier exhausted, no path found");
        Vec::new()
    }

    fn reconstruct_path(&self, goal_key: &str) -> Vec<String> {
        let mut path = Vec::new();
        let mut cur = Some(goal_key.to_string());
        while let Some(key) = cur {
            cur = self.nav_map[&key].parent.clone();
            path.push(key);
        }
        path.reverse();
        path
    }

    /// Map-frame location of a node key, if it has been materialized.
    pub fn location_of_key(&self, key: &str) -> Option<(f64, f64)> {
        self.nav_map.get(key).map(|n| n.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecmap::VectorMap;

    #[test]
    fn straight_path_on_empty_map() {
        let map = Arc::new(VectorMap::from_segments(vec![]));
        let mut planner = GlobalPlanner::new(map, 0.25, 0.1);
        let path = planner.plan(Pose2D::origin(), Pose2D::new(1.0, 0.0, 0.0));
        assert!(!path.is_empty());
        assert!(path.len() >= 4 && path.len() <= 6);

        let mut prev_dist = f64::INFINITY;
        for key in &path {
            let (x, y) = planner.location_of_key(key).unwrap();
            let dist = ((x - 1.0).powi(2) + y.powi(2)).sqrt();
            assert!(dist <= prev_dist + 1e-9);
            prev_dist = dist;
        }
    }

    #[test]
    fn blocked_corridor_returns_empty_path() {
        let map = Arc::new(VectorMap::from_segments(vec![LineSegment::new(
            0.5, -1.0, 0.5, 1.0,
        )]));
        let mut planner = GlobalPlanner::new(map, 0.25, 0.2);
        let path = planner.plan(Pose2D::origin(), Pose2D::new(1.0, 0.0, 0.0));
        assert!(path.is_empty());
    }

    #[test]
    fn changing_start_clears_the_node_map() {
        let map = Arc::new(VectorMap::from_segments(vec![]));
        let mut planner = GlobalPlanner::new(map, 0.25, 0.1);
        planner.plan(Pose2D::origin(), Pose2D::new(1.0, 0.0, 0.0));
        assert!(!planner.nav_map.is_empty());
        planner.plan(Pose2D::new(5.0, 5.0, 0.0), Pose2D::new(6.0, 5.0, 0.0));
        // every materialized node should be rooted at the new origin
        assert_eq!(planner.origin, Some((5.0, 5.0)));
    }

    #[test]
    fn g_never_decreases_once_expanded() {
        let map = Arc::new(VectorMap::from_segments(vec![]));
        let mut planner = GlobalPlanner::new(map, 0.25, 0.1);
        planner.plan(Pose2D::origin(), Pose2D::new(2.0, 1.0, 0.0));
        for node in planner.nav_map.values() {
            assert!(node.g.is_finite() || node.g == f64::INFINITY);
        }
    }
}
