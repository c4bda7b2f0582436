//! Latency compensator.
//!
//! Forward-simulates a kinematic bicycle model over a buffer of recently
//! issued body-frame velocity commands, so the navigation coordinator can
//! act on the pose the robot is predicted to occupy once actuation and
//! observation delay have elapsed, rather than the stale observed pose.

use std::collections::VecDeque;
use types::Pose2D;

/// One issued velocity command, stamped with the time it was recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandRecord {
    pub linear_x: f64,
    pub linear_y: f64,
    pub angular: f64,
    pub timestamp: f64,
}

/// Buffers recent commands and forward-integrates them to predict the pose
/// `actuation_delay + observation_delay` seconds ahead of the last
/// observation.
pub struct LatencyCompensator {
    actuation_delay: f64,
    observation_delay: f64,
    delta_t: f64,
    buffer: VecDeque<CommandRecord>,
    last_observation_time: f64,
    last_input_time: Option<f64>,
}

impl LatencyCompensator {
    pub fn new(actuation_delay: f64, observation_delay: f64, delta_t: f64) -> Self {
        Self {
            actuation_delay,
            observation_delay,
            delta_t,
            buffer: VecDeque::new(),
            last_observation_time: 0.0,
            last_input_time: None,
        }
    }

    pub fn total_delay(&self) -> f64 {
        self.actuation_delay + self.observation_delay
    }

    /// Append a new command. Rejects (and logs) a record whose timestamp is
    /// not strictly greater than the previously recorded one.
    pub fn record_new_input(&mut self, linear_x: f64, linear_y: f64, angular: f64, now: f64) {
        if let Some(last) = self.last_input_time {
            if now <= last {
                tracing::warn!(now, last, "rejected non-monotone command record");
                return;
            }
        }
        self.last_input_time = Some(now);
        self.buffer.push_back(CommandRecord {
            linear_x,
            linear_y,
            angular,
            timestamp: now,
        });
    }

    /// Stamp the time the most recent sensor state corresponds to.
    pub fn record_observation(&mut self, now: f64) {
        self.last_observation_time = now;
    }

    /// Predict the pose `total_delay()` seconds into the future from
    /// `observed_pose`, by pruning already-reflected commands and
    /// forward-integrating the rest in body frame.
    pub fn predicted_state(&mut self, observed_pose: Pose2D) -> Pose2D {
        if self.buffer.is_empty() {
            return observed_pose;
        }

        let cutoff = self.last_observation_time - self.observation_delay;
        while let Some(front) = self.buffer.front() {
            if front.timestamp <= cutoff {
                self.buffer.pop_front();
            } else {
                break;
            }
        }

        let mut pose = observed_pose;
        for record in &self.buffer {
            let (sin_t, cos_t) = pose.theta.sin_cos();
            pose.x += (record.linear_x * cos_t - record.linear_y * sin_t) * self.delta_t;
            pose.y += (record.linear_x * sin_t + record.linear_y * cos_t) * self.delta_t;
            pose.theta = types::wrap_angle(pose.theta + record.angular * self.delta_t);
        }
        pose
    }
}
