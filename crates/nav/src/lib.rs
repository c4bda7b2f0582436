//! Navigation coordinator.
//!
//! Binds the localizer's pose estimate, the global planner's waypoints,
//! and the latency compensator's prediction into a single per-tick
//! target handed to the external local planner.

use planner::GlobalPlanner;
use std::sync::Arc;
use tracing::{debug, info};
use types::{LaserScan, NavGoal, Pose2D, Twist};
use vecmap::{LineSegment, VectorMap};

/// Coordinator-internal replan state. Not part of the source's design in
/// so many words, but makes the replan triggers in the core spec testable
/// as state transitions rather than scattered conditionals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Idle,
    Planning,
    Following,
    Blocked,
}

/// External collaborator that turns (predicted pose, local target, live
/// scan) into a velocity command. Its trajectory-scoring internals are not
/// specified; [`PurePursuitPlanner`] is a minimal stand-in so the
/// coordinator is exercisable end to end.
pub trait LocalPlanner {
    fn compute_command(
        &self,
        predicted_pose: Pose2D,
        target: Pose2D,
        scan: Option<&LaserScan>,
    ) -> Twist;
}

/// A minimal proportional-heading local planner. Not a specified
/// subsystem: it exists only to drive the coordinator's pipeline in tests
/// and the `navd run` demo.
pub struct PurePursuitPlanner {
    pub linear_speed: f64,
    pub angular_gain: f64,
}

impl Default for PurePursuitPlanner {
    fn default() -> Self {
        Self {
            linear_speed: 0.5,
            angular_gain: 1.5,
        }
    }
}

impl LocalPlanner for PurePursuitPlanner {
    fn compute_command(
        &self,
        predicted_pose: Pose2D,
        target: Pose2D,
        _scan: Option<&LaserScan>,
    ) -> Twist {
        let dx = target.x - predicted_pose.x;
        let dy = target.y - predicted_pose.y;
        let heading_to_target = dy.atan2(dx);
        let heading_error = transforms::angle_diff(predicted_pose.theta, heading_to_target);
        let linear = self.linear_speed * heading_error.cos().max(0.0);
        Twist::new(linear, 0.0, self.angular_gain * heading_error)
    }
}

/// Binds C4 (via its pose estimate, passed in each tick), C5 and C6.
pub struct Coordinator {
    map: Arc<VectorMap>,
    planner: GlobalPlanner,
    compensator: compensator::LatencyCompensator,
    goal: Option<NavGoal>,
    path: Vec<String>,
    state: NavState,
    carrot_radius: f64,
    divergence_threshold: f64,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        map: Arc<VectorMap>,
        resolution: f64,
        clearance_offset: f64,
        actuation_delay: f64,
        observation_delay: f64,
        delta_t: f64,
        carrot_radius: f64,
        divergence_threshold: f64,
    ) -> Self {
        Self {
            planner: GlobalPlanner::new(Arc::clone(&map), resolution, clearance_offset),
            compensator: compensator::LatencyCompensator::new(
                actuation_delay,
                observation_delay,
                delta_t,
            ),
            map,
            goal: None,
            path: Vec::new(),
            state: NavState::Idle,
            carrot_radius,
            divergence_threshold,
        }
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Set a new goal. A goal change invalidates the current path but not
    /// any externally-owned filter state.
    pub fn set_goal(&mut self, goal: NavGoal) {
        if self.goal != Some(goal) {
            info!(?goal, "navigation goal changed");
            self.goal = Some(goal);
            self.path.clear();
            self.state = NavState::Planning;
        }
    }

    /// Signal that the first segment of the remaining path has become
    /// blocked by a live obstacle, forcing a replan on the next tick.
    pub fn notify_path_blocked(&mut self) {
        info!("path blocked, forcing replan");
        self.path.clear();
        self.state = NavState::Planning;
    }

    /// True if a live scan shows a return shorter than the distance to the
    /// first remaining waypoint, along the bearing to that waypoint.
    fn scan_blocks_first_segment(&self, pose: Pose2D, scan: &LaserScan) -> bool {
        let Some(first_key) = self.path.first() else {
            return false;
        };
        let Some((wx, wy)) = self.planner.location_of_key(first_key) else {
            return false;
        };
        let dx = wx - pose.x;
        let dy = wy - pose.y;
        let segment_length = dx.hypot(dy);
        if segment_length <= f64::EPSILON || scan.num_ranges() == 0 {
            return false;
        }

        let bearing = transforms::angle_diff(pose.theta, dy.atan2(dx));
        let angle_min = scan.angle_min as f64;
        let angle_max = scan.angle_max as f64;
        if bearing < angle_min || bearing > angle_max {
            return false;
        }
        let span = angle_max - angle_min;
        let index = if span > 0.0 && scan.num_ranges() > 1 {
            (((bearing - angle_min) / span) * (scan.num_ranges() - 1) as f64).round() as usize
        } else {
            0
        };
        let Some(&range) = scan.ranges.get(index) else {
            return false;
        };
        let range = range as f64;
        if range < scan.range_min as f64 || range > scan.range_max as f64 {
            return false;
        }

        range + self.planner.clearance_offset() < segment_length
    }

    fn replan(&mut self, from: Pose2D) {
        let Some(goal) = self.goal else {
            self.state = NavState::Idle;
            return;
        };
        self.path = self.planner.plan(from, goal.as_pose());
        self.state = if self.path.is_empty() {
            NavState::Blocked
        } else {
            NavState::Following
        };
        debug!(waypoints = self.path.len(), ?self.state, "replanned");
    }

    fn nearest_path_distance(&self, pose: Pose2D) -> Option<f64> {
        self.path
            .iter()
            .filter_map(|key| self.planner.location_of_key(key))
            .map(|(x, y)| ((x - pose.x).powi(2) + (y - pose.y).powi(2)).sqrt())
            .fold(None, |acc, d| Some(acc.map_or(d, |a: f64| a.min(d))))
    }

    /// Furthest waypoint within the carrot radius of `pose` that is
    /// reachable from `pose` without crossing the map.
    fn select_carrot(&self, pose: Pose2D) -> Option<Pose2D> {
        for key in self.path.iter().rev() {
            let Some((x, y)) = self.planner.location_of_key(key) else {
                continue;
            };
            let dist = ((x - pose.x).powi(2) + (y - pose.y).powi(2)).sqrt();
            if dist > self.carrot_radius {
                continue;
            }
            let reach = LineSegment::new(pose.x, pose.y, x, y);
            if self.map.intersect(&reach).is_none() {
                return Some(Pose2D::new(x, y, pose.theta));
            }
        }
        None
    }

    /// One coordinator tick: obtain the predicted pose, pick a carrot
    /// waypoint, hand off to the local planner, and record the resulting
    /// command back into the compensator. Returns `None` if there is
    /// nothing reachable to command (hold position).
    pub fn tick(
        &mut self,
        filter_pose: Pose2D,
        scan: Option<&LaserScan>,
        now: f64,
        local_planner: &dyn LocalPlanner,
    ) -> Option<Twist> {
        if self.goal.is_none() {
            self.state = NavState::Idle;
            return None;
        }
        if self.path.is_empty() || self.state == NavState::Planning {
            self.replan(filter_pose);
        }
        if self.path.is_empty() {
            return None;
        }

        if let Some(scan) = scan {
            if self.scan_blocks_first_segment(filter_pose, scan) {
                self.notify_path_blocked();
                self.replan(filter_pose);
                if self.path.is_empty() {
                    return None;
                }
            }
        }

        self.compensator.record_observation(now);
        let predicted = self.compensator.predicted_state(filter_pose);

        if let Some(nearest) = self.nearest_path_distance(predicted) {
            if nearest > self.divergence_threshold {
                self.replan(filter_pose);
                if self.path.is_empty() {
                    return None;
                }
            }
        }

        let target = self.select_carrot(predicted)?;
        let command = local_planner.compute_command(predicted, target, scan);
        self.compensator
            .record_new_input(command.linear_x, command.linear_y, command.angular, now);
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_map() -> Arc<VectorMap> {
        Arc::new(VectorMap::from_segments(vec![]))
    }

    #[test]
    fn no_goal_is_idle_and_emits_nothing() {
        let mut coord = Coordinator::new(empty_map(), 0.25, 0.1, 0.1, 0.1, 0.05, 1.0, 0.5);
        let planner = PurePursuitPlanner::default();
        let cmd = coord.tick(Pose2D::origin(), None, 0.0, &planner);
        assert!(cmd.is_none());
        assert_eq!(coord.state(), NavState::Idle);
    }

    #[test]
    fn goal_triggers_plan_and_emits_a_command() {
        let mut coord = Coordinator::new(empty_map(), 0.25, 0.1, 0.1, 0.1, 0.05, 2.0, 1.0);
        coord.set_goal(NavGoal {
            x: 1.0,
            y: 0.0,
            theta: 0.0,
        });
        let planner = PurePursuitPlanner::default();
        let cmd = coord.tick(Pose2D::origin(), None, 0.0, &planner);
        assert!(cmd.is_some());
        assert_eq!(coord.state(), NavState::Following);
        assert!(!coord.path().is_empty());
    }

    #[test]
    fn goal_change_clears_the_path() {
        let mut coord = Coordinator::new(empty_map(), 0.25, 0.1, 0.1, 0.1, 0.05, 2.0, 1.0);
        coord.set_goal(NavGoal {
            x: 1.0,
            y: 0.0,
            theta: 0.0,
        });
        let planner = PurePursuitPlanner::default();
        coord.tick(Pose2D::origin(), None, 0.0, &planner);
        assert!(!coord.path().is_empty());
        coord.set_goal(NavGoal {
            x: -1.0,
            y: 0.0,
            theta: 0.0,
        });
        assert!(coord.path().is_empty());
        assert_eq!(coord.state(), NavState::Planning);
    }

    #[test]
    fn blocked_goal_holds_position() {
        let map = Arc::new(VectorMap::from_segments(vec![LineSegment::new(
            0.5, -5.0, 0.5, 5.0,
        )]));
        let mut coord = Coordinator::new(map, 0.25, 0.3, 0.1, 0.1, 0.05, 2.0, 1.0);
        coord.set_goal(NavGoal {
            x: 1.0,
            y: 0.0,
            theta: 0.0,
        });
        let planner = PurePursuitPlanner::default();
        let cmd = coord.tick(Pose2D::origin(), None, 0.0, &planner);
        assert!(cmd.is_none());
        assert_eq!(coord.state(), NavState::Blocked);
    }

    fn forward_scan(range: f32) -> LaserScan {
        LaserScan {
            ranges: vec![range; 5],
            range_min: 0.05,
            range_max: 10.0,
            angle_min: -0.1,
            angle_max: 0.1,
            stamp: 0.0,
        }
    }

    #[test]
    fn close_range_scan_blocks_the_first_segment() {
        let mut coord = Coordinator::new(empty_map(), 0.25, 0.1, 0.1, 0.1, 0.05, 2.0, 1.0);
        coord.set_goal(NavGoal {
            x: 2.0,
            y: 0.0,
            theta: 0.0,
        });
        let planner = PurePursuitPlanner::default();
        coord.tick(Pose2D::origin(), None, 0.0, &planner);
        assert!(!coord.path().is_empty());
        assert!(coord.scan_blocks_first_segment(Pose2D::origin(), &forward_scan(0.1)));
    }

    #[test]
    fn distant_scan_does_not_block_the_first_segment() {
        let mut coord = Coordinator::new(empty_map(), 0.25, 0.1, 0.1, 0.1, 0.05, 2.0, 1.0);
        coord.set_goal(NavGoal {
            x: 2.0,
            y: 0.0,
            theta: 0.0,
        });
        let planner = PurePursuitPlanner::default();
        coord.tick(Pose2D::origin(), None, 0.0, &planner);
        assert!(!coord.scan_blocks_first_segment(Pose2D::origin(), &forward_scan(9.0)));
    }

    #[test]
    fn live_obstacle_triggers_a_replan_within_the_same_tick() {
        let mut coord = Coordinator::new(empty_map(), 0.25, 0.1, 0.1, 0.1, 0.05, 2.0, 1.0);
        coord.set_goal(NavGoal {
            x: 2.0,
            y: 0.0,
            theta: 0.0,
        });
        let planner = PurePursuitPlanner::default();
        coord.tick(Pose2D::origin(), None, 0.0, &planner);
        assert!(!coord.path().is_empty());

        let scan = forward_scan(0.1);
        let cmd = coord.tick(Pose2D::origin(), Some(&scan), 0.05, &planner);
        // The map is open, so the replan finds a path again immediately.
        assert!(cmd.is_some());
        assert!(!coord.path().is_empty());
    }
}
