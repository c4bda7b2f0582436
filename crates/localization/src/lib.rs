//! Particle-filter localization.
//!
//! Fuses wheel odometry (motion model) and a laser scan (sensor model)
//! against a shared, read-only [`VectorMap`] to track the robot's pose.

use std::sync::Arc;
use tracing::{debug, trace};
use types::{LaserScan, Pose2D};
use vecmap::{LineSegment, VectorMap};

/// Forward offset of the laser frame from base_link, along heading.
const LASER_OFFSET: f64 = 0.2;

/// A candidate pose hypothesis weighted by how well it explains
/// observations so far this generation. Log-weights are only meaningful
/// relative to the generation's recorded maximum.
#[derive(Debug, Clone, Copy)]
pub struct Particle {
    pub pose: Pose2D,
    pub log_weight: f64,
}

/// Motion- and sensor-model tuning parameters, plus the particle count.
#[derive(Debug, Clone, Copy)]
pub struct FilterParams {
    pub num_particles: usize,
    pub d_short: f64,
    pub d_long: f64,
    pub var_obs: f64,
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
    pub resample_interval: u32,
    /// Divides `num_ranges` to get the number of rays actually cast per
    /// particle; the source hardcodes 10 with no documented rationale.
    pub subsample_divisor: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            num_particles: 50,
            d_short: 0.5,
            d_long: 2.0,
            var_obs: 0.25,
            k1: 0.50,
            k2: 0.25,
            k3: 0.50,
            k4: 0.75,
            resample_interval: 5,
            subsample_divisor: 10,
        }
    }
}

/// Owns the particle set, the odometry baseline, the shared map, the RNG,
/// and the sensor-model parameters for one localization run. Replaced
/// wholesale on re-initialization.
pub struct FilterState {
    map: Arc<VectorMap>,
    rng: pf_random::RandomSource,
    params: FilterParams,
    particles: Vec<Particle>,
    prev_odom: Option<Pose2D>,
    last_laser_pose: Option<Pose2D>,
    max_log_weight: f64,
    laser_updates: u32,
}

impl FilterState {
    pub fn new(map: Arc<VectorMap>, params: FilterParams, seed: u64) -> Self {
        Self {
            map,
            rng: pf_random::RandomSource::new(seed),
            params,
            particles: Vec::new(),
            prev_odom: None,
            last_laser_pose: None,
            max_log_weight: 0.0,
            laser_updates: 0,
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Seed `num_particles` particles from Gaussians around `(loc, angle)`
    /// and clear all filter-instance state.
    pub fn initialize(&mut self, loc: (f64, f64), angle: f64) {
        self.particles = (0..self.params.num_particles)
            .map(|_| Particle {
                pose: Pose2D::new(
                    self.rng.gaussian(loc.0, 0.25),
                    self.rng.gaussian(loc.1, 0.25),
                    self.rng.gaussian(angle, std::f64::consts::PI / 6.0),
                ),
                log_weight: 0.0,
            })
            .collect();
        self.prev_odom = None;
        self.last_laser_pose = None;
        self.max_log_weight = 0.0;
        self.laser_updates = 0;
        debug!(n = self.particles.len(), ?loc, angle, "filter initialized");
    }

    /// Propagate particles by the odometry delta since the last call. On
    /// the first call, or a teleport larger than 1m/tick, re-baselines
    /// without propagating.
    pub fn observe_odometry(&mut self, odom_loc: (f64, f64), odom_angle: f64) {
        let current = Pose2D::new(odom_loc.0, odom_loc.1, odom_angle);
        let Some(prev) = self.prev_odom else {
            self.prev_odom = Some(current);
            return;
        };

        let dx = current.x - prev.x;
        let dy = current.y - prev.y;
        let trans_norm = dx.hypot(dy);
        if trans_norm > 1.0 {
            trace!(trans_norm, "odometry teleport rejected, re-baselining");
            self.prev_odom = Some(current);
            return;
        }
        let dtheta = transforms::angle_diff(prev.theta, current.theta);

        let sigma_t = self.params.k1 * trans_norm + self.params.k2 * dtheta.abs();
        let sigma_r = self.params.k3 * trans_norm + self.params.k4 * dtheta.abs();

        for particle in &mut self.particles {
            let heading_delta = particle.pose.theta - prev.theta;
            let (sin_h, cos_h) = heading_delta.sin_cos();
            let rotated_dx = dx * cos_h - dy * sin_h;
            let rotated_dy = dx * sin_h + dy * cos_h;

            let noisy_dx = rotated_dx + self.rng.gaussian(0.0, sigma_t);
            let noisy_dy = rotated_dy + self.rng.gaussian(0.0, sigma_t);
            let noisy_dtheta = dtheta + self.rng.gaussian(0.0, sigma_r);

            particle.pose = Pose2D::new(
                particle.pose.x + noisy_dx,
                particle.pose.y + noisy_dy,
                particle.pose.theta + noisy_dtheta,
            );
        }

        self.prev_odom = Some(current);
    }

    /// Reweight particles against a laser scan, gated on having moved
    /// between 0.1m and 1.0m since the last accepted sensor update.
    /// Resamples every `resample_interval`-th accepted update.
    pub fn observe_laser(&mut self, scan: &LaserScan) {
        let Some(current_odom) = self.prev_odom else {
            return;
        };
        let Some(baseline) = self.last_laser_pose else {
            self.last_laser_pose = Some(current_odom);
            return;
        };
        let moved = baseline.distance_to(&current_odom);
        if !(0.1..=1.0).contains(&moved) {
            return;
        }
        self.last_laser_pose = Some(current_odom);

        let num_rays = scan.num_ranges() / self.params.subsample_divisor;
        if num_rays == 0 {
            return;
        }
        let stride = scan.num_ranges() / num_rays;

        let params = self.params;
        let map = Arc::clone(&self.map);
        let score = move |pose: Pose2D| -> f64 {
            score_particle(&map, pose, scan, num_rays, stride, &params)
        };

        #[cfg(feature = "parallel")]
        let scored: Vec<f64> = {
            use rayon::prelude::*;
            self.particles.par_iter().map(|p| score(p.pose)).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let scored: Vec<f64> = self.particles.iter().map(|p| score(p.pose)).collect();

        for (particle, delta) in self.particles.iter_mut().zip(scored) {
            particle.log_weight += delta;
        }

        self.max_log_weight = self
            .particles
            .iter()
            .map(|p| p.log_weight)
            .fold(f64::NEG_INFINITY, f64::max);

        self.laser_updates += 1;
        if self.laser_updates % self.params.resample_interval == 0 {
            self.resample();
        }
    }

    /// Systematic low-variance resampling: produces exactly `num_particles`
    /// particles with variance lower than independent multinomial draws.
    pub fn resample(&mut self) {
        let n = self.particles.len();
        if n == 0 {
            return;
        }
        let max = self.max_log_weight;
        let weights: Vec<f64> = self
            .particles
            .iter()
            .map(|p| (p.log_weight - max).exp())
            .collect();

        let mut cumsum = Vec::with_capacity(n);
        let mut running = 0.0;
        for w in &weights {
            running += w;
            cumsum.push(running);
        }
        let total = running;
        if total <= 0.0 {
            return;
        }

        let step = total / n as f64;
        let mut u = self.rng.uniform(0.0, step);
        let mut new_particles = Vec::with_capacity(n);
        let mut i = 0;
        while new_particles.len() < n {
            if u < cumsum[i] {
                new_particles.push(self.particles[i]);
                u += step;
            } else if i + 1 < n {
                i += 1;
            } else {
                // Floating-point slack at the tail: emit the last particle
                // for any remaining slots.
                new_particles.push(self.particles[i]);
                u += step;
            }
        }

        self.particles = new_particles;
        self.max_log_weight = 0.0;
    }

    /// Weighted mean pose. Heading uses the circular mean (see
    /// `transforms::circular_mean`) rather than an arithmetic mean of
    /// unwrapped angles, which is ill-defined near +/-PI.
    pub fn get_location(&self) -> Pose2D {
        if self.particles.is_empty() {
            return Pose2D::origin();
        }
        let weights: Vec<f64> = self
            .particles
            .iter()
            .map(|p| (p.log_weight - self.max_log_weight).exp())
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return self.particles[0].pose;
        }

        let mean_x: f64 = self
            .particles
            .iter()
            .zip(&weights)
            .map(|(p, w)| p.pose.x * w)
            .sum::<f64>()
            / total;
        let mean_y: f64 = self
            .particles
            .iter()
            .zip(&weights)
            .map(|(p, w)| p.pose.y * w)
            .sum::<f64>()
            / total;
        let angles: Vec<f64> = self.particles.iter().map(|p| p.pose.theta).collect();
        let mean_theta = transforms::circular_mean(&angles, &weights);

        Pose2D::new(mean_x, mean_y, mean_theta)
    }
}

/// Predicted range from `origin` along `angle` (map frame), via ray cast
/// against `map`. `None` if nothing is hit within `(range_min, range_max)`.
fn predicted_range(
    map: &VectorMap,
    origin: (f64, f64),
    angle: f64,
    range_min: f32,
    range_max: f32,
) -> Option<f64> {
    let far = (
        origin.0 + range_max as f64 * angle.cos(),
        origin.1 + range_max as f64 * angle.sin(),
    );
    let ray = LineSegment::new(origin.0, origin.1, far.0, far.1);
    let hit = map.intersect(&ray)?;
    let dist = ((hit.x - origin.0).powi(2) + (hit.y - origin.1).powi(2)).sqrt();
    if dist > range_min as f64 && dist < range_max as f64 {
        Some(dist)
    } else {
        None
    }
}

fn score_particle(
    map: &VectorMap,
    pose: Pose2D,
    scan: &LaserScan,
    num_rays: usize,
    stride: usize,
    params: &FilterParams,
) -> f64 {
    let laser_origin = (
        pose.x + LASER_OFFSET * pose.theta.cos(),
        pose.y + LASER_OFFSET * pose.theta.sin(),
    );
    let angle_span = (scan.angle_max - scan.angle_min) as f64;
    let angle_step = if num_rays > 1 {
        angle_span / (num_rays - 1) as f64
    } else {
        0.0
    };

    let mut log_weight = 0.0;
    for k in 0..num_rays {
        let measured = match scan.ranges.get(k * stride) {
            Some(&r) => r as f64,
            None => continue,
        };
        if measured > 0.95 * scan.range_max as f64 || measured < 1.05 * scan.range_min as f64 {
            continue;
        }
        let local_angle = scan.angle_min as f64 + k as f64 * angle_step;
        let map_angle = pose.theta + local_angle;
        let Some(predicted) =
            predicted_range(map, laser_origin, map_angle, scan.range_min, scan.range_max)
        else {
            continue;
        };
        let d = (measured - predicted).clamp(-params.d_short, params.d_long);
        log_weight += -(d * d) / params.var_obs;
    }
    log_weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecmap::VectorMap;

    fn unit_square_map() -> Arc<VectorMap> {
        Arc::new(VectorMap::from_segments(vec![
            LineSegment::new(0.0, 0.0, 1.0, 0.0),
            LineSegment::new(1.0, 0.0, 1.0, 1.0),
            LineSegment::new(1.0, 1.0, 0.0, 1.0),
            LineSegment::new(0.0, 1.0, 0.0, 0.0),
        ]))
    }

    #[test]
    fn ray_cast_against_unit_square_matches_expected_range() {
        let map = unit_square_map();
        let scan = LaserScan {
            ranges: vec![5.0; 10],
            range_min: 0.05,
            range_max: 10.0,
            angle_min: 0.0,
            angle_max: 0.0,
            stamp: 0.0,
        };
        let pose = Pose2D::new(0.5, 0.5, 0.0);
        let r = predicted_range(
            &map,
            (pose.x + LASER_OFFSET, pose.y),
            0.0,
            scan.range_min,
            scan.range_max,
        )
        .unwrap();
        assert!((r - 0.3).abs() < 1e-9);
    }

    #[test]
    fn resample_preserves_particle_count() {
        let map = unit_square_map();
        let mut filter = FilterState::new(map, FilterParams::default(), 1);
        filter.initialize((0.0, 0.0), 0.0);
        filter.particles[0].log_weight = 0.0;
        for p in filter.particles.iter_mut().skip(1) {
            p.log_weight = -1000.0;
        }
        filter.max_log_weight = 0.0;
        filter.resample();
        assert_eq!(filter.particles.len(), filter.params.num_particles);
        let heavy_pose = filter.particles[0].pose;
        for p in &filter.particles {
            assert!((p.pose.x - heavy_pose.x).abs() < 1e-9);
            assert!((p.pose.y - heavy_pose.y).abs() < 1e-9);
        }
    }

    #[test]
    fn odometry_gate_rejects_teleport() {
        let map = unit_square_map();
        let mut filter = FilterState::new(map, FilterParams::default(), 2);
        filter.initialize((0.0, 0.0), 0.0);
        filter.observe_odometry((0.0, 0.0), 0.0);
        let poses_before: Vec<Pose2D> = filter.particles.iter().map(|p| p.pose).collect();
        filter.observe_odometry((5.0, 0.0), 0.0);
        let poses_after: Vec<Pose2D> = filter.particles.iter().map(|p| p.pose).collect();
        assert_eq!(poses_before, poses_after);
        assert_eq!(filter.prev_odom.unwrap().x, 5.0);
    }

    #[test]
    fn zero_noise_odometry_shifts_particles_by_exact_delta() {
        let map = unit_square_map();
        let mut params = FilterParams::default();
        params.k1 = 0.0;
        params.k2 = 0.0;
        params.k3 = 0.0;
        params.k4 = 0.0;
        let mut filter = FilterState::new(map, params, 3);
        filter.initialize((0.0, 0.0), 0.0);
        for p in &mut filter.particles {
            p.pose = Pose2D::origin();
        }
        filter.observe_odometry((0.0, 0.0), 0.0);
        filter.observe_odometry((0.3, 0.0), 0.0);
        for p in &filter.particles {
            assert!((p.pose.x - 0.3).abs() < 1e-9);
            assert!((p.pose.y - 0.0).abs() < 1e-9);
        }
    }

    #[test]
    fn particle_poses_remain_finite_after_many_updates() {
        let map = unit_square_map();
        let mut filter = FilterState::new(map, FilterParams::default(), 4);
        filter.initialize((0.0, 0.0), 0.0);
        for i in 0..50 {
            let angle = (i as f64) * 0.01;
            filter.observe_odometry((i as f64 * 0.05, 0.0), angle);
            for p in &filter.particles {
                assert!(p.pose.x.is_finite());
                assert!(p.pose.y.is_finite());
                assert!(p.pose.theta.is_finite());
            }
        }
        assert!(filter.get_location().x.is_finite());
    }

    #[test]
    fn empty_particle_set_get_location_is_origin() {
        let map = unit_square_map();
        let filter = FilterState::new(map, FilterParams::default(), 5);
        let loc = filter.get_location();
        assert_eq!(loc, Pose2D::origin());
    }
}
