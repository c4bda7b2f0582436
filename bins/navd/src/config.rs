//! TOML configuration file loading. A missing file falls back to built-in
//! defaults with a warning; a malformed one fails fast, since a typo'd
//! config silently running on defaults is worse than a startup error.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub num_particles: usize,
    pub d_short: f64,
    pub d_long: f64,
    pub var_obs: f64,
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
    pub resample_interval: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        let p = localization::FilterParams::default();
        Self {
            num_particles: p.num_particles,
            d_short: p.d_short,
            d_long: p.d_long,
            var_obs: p.var_obs,
            k1: p.k1,
            k2: p.k2,
            k3: p.k3,
            k4: p.k4,
            resample_interval: p.resample_interval,
        }
    }
}

impl From<FilterConfig> for localization::FilterParams {
    fn from(c: FilterConfig) -> Self {
        localization::FilterParams {
            num_particles: c.num_particles,
            d_short: c.d_short,
            d_long: c.d_long,
            var_obs: c.var_obs,
            k1: c.k1,
            k2: c.k2,
            k3: c.k3,
            k4: c.k4,
            resample_interval: c.resample_interval,
            ..localization::FilterParams::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub resolution: f64,
    pub clearance_offset: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            resolution: 0.25,
            clearance_offset: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompensatorConfig {
    pub actuation_delay: f64,
    pub observation_delay: f64,
    pub delta_t: f64,
}

impl Default for CompensatorConfig {
    fn default() -> Self {
        Self {
            actuation_delay: 0.1,
            observation_delay: 0.1,
            delta_t: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub carrot_radius: f64,
    pub divergence_threshold: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            carrot_radius: 1.5,
            divergence_threshold: 0.75,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NavFileConfig {
    pub filter: FilterConfig,
    pub planner: PlannerConfig,
    pub compensator: CompensatorConfig,
    pub coordinator: CoordinatorConfig,
}

impl NavFileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!(?path, "config file not found, using defaults");
                return Ok(Self::default());
            }
        };
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}
