//! `navd`: CLI entry point for the navigation core.
//!
//! The publish/subscribe transport that would normally deliver odometry,
//! laser scans and initial-pose messages is out of scope for the core;
//! these subcommands stand in for it with a one-shot plan, a flat-file
//! sensor-log replay, and a synthetic-sensor coordinator demo.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::NavFileConfig;
use localization::{FilterParams, FilterState};
use nav::{Coordinator, PurePursuitPlanner};
use planner::GlobalPlanner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use types::{LaserScan, NavGoal, Pose2D};
use vecmap::VectorMap;

#[derive(Parser)]
#[command(name = "navd", about = "Localization, planning and latency-compensated navigation core")]
struct Args {
    /// Path to a TOML configuration file; missing/malformed falls back to defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter, e.g. "info", "debug", "navd=trace".
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the global planner once and print the resulting waypoints.
    Plan {
        /// Map name, resolved to maps/<name>.txt
        #[arg(long)]
        map: String,
        #[arg(long, value_parser = parse_xy)]
        start: (f64, f64),
        #[arg(long, value_parser = parse_xy)]
        goal: (f64, f64),
    },
    /// Replay a recorded odometry/laser log through the particle filter.
    Localize {
        #[arg(long)]
        map: String,
        #[arg(long)]
        log: PathBuf,
        #[arg(long, value_parser = parse_xyt)]
        initial_pose: (f64, f64, f64),
    },
    /// Run the full coordinator loop against a synthetic sensor stream.
    Run {
        #[arg(long)]
        map: String,
        #[arg(long, value_parser = parse_xyt)]
        start: (f64, f64, f64),
        #[arg(long, value_parser = parse_xyt)]
        goal: (f64, f64, f64),
        #[arg(long, default_value_t = 40)]
        ticks: u32,
    },
}

fn parse_xy(s: &str) -> Result<(f64, f64), String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        return Err(format!("expected \"x,y\", got {s:?}"));
    }
    let x = parts[0].trim().parse().map_err(|_| format!("bad x in {s:?}"))?;
    let y = parts[1].trim().parse().map_err(|_| format!("bad y in {s:?}"))?;
    Ok((x, y))
}

fn parse_xyt(s: &str) -> Result<(f64, f64, f64), String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("expected \"x,y,theta\", got {s:?}"));
    }
    let x = parts[0].trim().parse().map_err(|_| format!("bad x in {s:?}"))?;
    let y = parts[1].trim().parse().map_err(|_| format!("bad y in {s:?}"))?;
    let theta = parts[2].trim().parse().map_err(|_| format!("bad theta in {s:?}"))?;
    Ok((x, y, theta))
}

fn init_logging(log_level: &str) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let file_appender = tracing_appender::rolling::daily("logs", "navd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}

fn resolve_map_path(name: &str) -> PathBuf {
    Path::new("maps").join(format!("{name}.txt"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args.log_level)?;
    let file_config = NavFileConfig::load(
        args.config
            .as_deref()
            .unwrap_or_else(|| Path::new("navd.toml")),
    )?;

    match args.command {
        Command::Plan { map, start, goal } => cmd_plan(&map, start, goal, &file_config),
        Command::Localize {
            map,
            log,
            initial_pose,
        } => cmd_localize(&map, &log, initial_pose, &file_config),
        Command::Run {
            map,
            start,
            goal,
            ticks,
        } => cmd_run(&map, start, goal, ticks, &file_config),
    }
}

fn load_map(name: &str) -> Result<Arc<VectorMap>> {
    let path = resolve_map_path(name);
    let map = VectorMap::load(&path)
        .with_context(|| format!("loading map {}", path.display()))?;
    Ok(Arc::new(map))
}

fn cmd_plan(map_name: &str, start: (f64, f64), goal: (f64, f64), cfg: &NavFileConfig) -> Result<()> {
    let map = load_map(map_name)?;
    let mut planner = GlobalPlanner::new(
        map,
        cfg.planner.resolution,
        cfg.planner.clearance_offset,
    );
    let path = planner.plan(
        Pose2D::new(start.0, start.1, 0.0),
        Pose2D::new(goal.0, goal.1, 0.0),
    );
    if path.is_empty() {
        println!("no path found");
        return Ok(());
    }
    for key in &path {
        let (x, y) = planner.location_of_key(key).expect("materialized by plan()");
        println!("{key}\t{x:.3}\t{y:.3}");
    }
    Ok(())
}

/// Flat-file sensor log format: one record per line.
///   ODOM x y theta
///   LASER range_min range_max angle_min angle_max r0,r1,r2,...
fn cmd_localize(
    map_name: &str,
    log_path: &Path,
    initial_pose: (f64, f64, f64),
    cfg: &NavFileConfig,
) -> Result<()> {
    let map = load_map(map_name)?;
    let mut filter = FilterState::new(map, FilterParams::from(cfg.filter.clone()), 0);
    filter.initialize((initial_pose.0, initial_pose.1), initial_pose.2);

    let text = std::fs::read_to_string(log_path)
        .with_context(|| format!("reading log {}", log_path.display()))?;
    let mut stamp = 0.0_f64;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("ODOM") => {
                let x: f64 = fields.next().context("ODOM x")?.parse()?;
                let y: f64 = fields.next().context("ODOM y")?.parse()?;
                let theta: f64 = fields.next().context("ODOM theta")?.parse()?;
                filter.observe_odometry((x, y), theta);
            }
            Some("LASER") => {
                let range_min: f32 = fields.next().context("LASER range_min")?.parse()?;
                let range_max: f32 = fields.next().context("LASER range_max")?.parse()?;
                let angle_min: f32 = fields.next().context("LASER angle_min")?.parse()?;
                let angle_max: f32 = fields.next().context("LASER angle_max")?.parse()?;
                let ranges: Vec<f32> = fields
                    .next()
                    .context("LASER ranges")?
                    .split(',')
                    .map(|s| s.parse())
                    .collect::<Result<_, _>>()?;
                let scan = LaserScan {
                    ranges,
                    range_min,
                    range_max,
                    angle_min,
                    angle_max,
                    stamp,
                };
                filter.observe_laser(&scan);
            }
            _ => continue,
        }
        stamp += 0.05;
        let pose = filter.get_location();
        println!("{stamp:.2}\t{:.3}\t{:.3}\t{:.3}", pose.x, pose.y, pose.theta);
    }
    Ok(())
}

/// Drives the coordinator with a synthetic, drift-free odometry/laser
/// stream, standing in for the external transport. Demonstrates the
/// per-tick data flow end to end; not a simulator.
fn cmd_run(
    map_name: &str,
    start: (f64, f64, f64),
    goal: (f64, f64, f64),
    ticks: u32,
    cfg: &NavFileConfig,
) -> Result<()> {
    let map = load_map(map_name)?;
    let mut filter = FilterState::new(
        Arc::clone(&map),
        FilterParams::from(cfg.filter.clone()),
        0,
    );
    filter.initialize((start.0, start.1), start.2);

    let mut coordinator = Coordinator::new(
        map,
        cfg.planner.resolution,
        cfg.planner.clearance_offset,
        cfg.compensator.actuation_delay,
        cfg.compensator.observation_delay,
        cfg.compensator.delta_t,
        cfg.coordinator.carrot_radius,
        cfg.coordinator.divergence_threshold,
    );
    coordinator.set_goal(NavGoal {
        x: goal.0,
        y: goal.1,
        theta: goal.2,
    });
    let local_planner = PurePursuitPlanner::default();
    let mut odom = (start.0, start.1, start.2);

    for tick in 0..ticks {
        let now = tick as f64 * cfg.compensator.delta_t;
        filter.observe_odometry((odom.0, odom.1), odom.2);
        let pose = filter.get_location();

        let command = coordinator.tick(pose, None, now, &local_planner);
        println!(
            "{tick}\tpose=({:.3},{:.3},{:.3})\tstate={:?}\tcmd={:?}",
            pose.x,
            pose.y,
            pose.theta,
            coordinator.state(),
            command
        );

        if let Some(cmd) = command {
            let (sin_t, cos_t) = odom.2.sin_cos();
            odom.0 += (cmd.linear_x * cos_t - cmd.linear_y * sin_t) * cfg.compensator.delta_t;
            odom.1 += (cmd.linear_x * sin_t + cmd.linear_y * cos_t) * cfg.compensator.delta_t;
            odom.2 = types::wrap_angle(odom.2 + cmd.angular * cfg.compensator.delta_t);
        }
    }

    Ok(())
}
