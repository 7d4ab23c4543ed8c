use anyhow::Result;
use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{interval, sleep, Duration, Instant};

use rep_tracker_rs::engine::{EngineContext, EngineEvent};
use rep_tracker_rs::live_status::LiveStatus;
use rep_tracker_rs::sensors::{AccelSample, OrientationSample, SensorFeed, SignalSource};
use rep_tracker_rs::trace::{self, SensorTrace, SyntheticShape};
use rep_tracker_rs::EngineConfig;

#[derive(Parser, Debug)]
#[command(name = "rep_tracker")]
#[command(about = "Count exercise reps from tilt sensor streams", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(ClapArgs, Debug)]
struct Tuning {
    /// JSON engine config (flags below override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Rep goal, clamped to 1..=200
    #[arg(long, global = true)]
    goal: Option<u32>,

    /// Bend threshold in degrees, clamped to 10..=60
    #[arg(long, global = true)]
    threshold: Option<f64>,

    /// Output directory
    #[arg(long, global = true, default_value = "rep_tracker_sessions")]
    output_dir: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded trace (.json or .json.gz)
    Replay {
        #[arg(value_name = "TRACE")]
        trace_path: PathBuf,

        /// Keep ticking this long after the last event
        #[arg(long, default_value = "1000")]
        settle_ms: u64,
    },
    /// Drive the engine live from a simulated host
    Simulate {
        /// Duration in seconds (0 = until the goal is reached)
        #[arg(value_name = "SECONDS", default_value = "0")]
        duration: u64,

        /// Feed acceleration instead of orientation events
        #[arg(long)]
        accel: bool,

        /// Tick period in milliseconds (host frame cadence)
        #[arg(long, default_value = "16")]
        tick_ms: u64,
    },
}

impl Tuning {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if let Some(goal) = self.goal {
            config.goal = goal;
        }
        if let Some(threshold) = self.threshold {
            config.threshold_deg = threshold;
        }
        Ok(config.validated()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.tuning.engine_config()?;
    std::fs::create_dir_all(&args.tuning.output_dir)?;

    println!("[{}] Rep Tracker RS Starting", ts_now());
    println!("  Goal: {}", config.goal);
    println!("  Threshold: {:.1}° (hysteresis {:.1}°)", config.threshold_deg, config.hysteresis_deg);
    println!("  Min rep interval: {}ms", config.min_rep_interval_ms);
    println!("  Output Dir: {}", args.tuning.output_dir);

    match args.command {
        Command::Replay {
            trace_path,
            settle_ms,
        } => {
            run_replay(&trace_path, config, settle_ms, &args.tuning.output_dir)
        }
        Command::Simulate {
            duration,
            accel,
            tick_ms,
        } => run_simulation(config, duration, accel, tick_ms, &args.tuning.output_dir).await,
    }
}

fn run_replay(path: &Path, config: EngineConfig, settle_ms: u64, output_dir: &str) -> Result<()> {
    let recorded = SensorTrace::load(path)?;
    println!(
        "[{}] Replaying {} events at {}ms ticks",
        ts_now(),
        recorded.events.len(),
        recorded.tick_interval_ms
    );

    let report = trace::replay(&recorded, config, settle_ms)?;
    for timed in &report.events {
        if !matches!(timed.event, EngineEvent::FilteredAngleUpdated { .. }) {
            println!("  [{:>7}ms] {}", timed.tick_ms, describe(&timed.event));
        }
    }

    let filename = format!("{}/replay_{}.json", output_dir, ts_now_clean());
    std::fs::write(&filename, serde_json::to_string_pretty(&report)?)?;

    println!("\n=== Replay Summary ===");
    println!("Ticks: {}", report.ticks);
    println!("Reps: {}/{}", report.reps, report.goal);
    println!("Rejected samples: {}", report.rejected_samples);
    if !report.command_errors.is_empty() {
        println!("Command errors: {}", report.command_errors.len());
    }
    println!("Report: {}", filename);
    Ok(())
}

async fn run_simulation(
    config: EngineConfig,
    duration: u64,
    accel: bool,
    tick_ms: u64,
    output_dir: &str,
) -> Result<()> {
    let shape = SyntheticShape {
        cycles: config.goal,
        source: if accel {
            SignalSource::Acceleration
        } else {
            SignalSource::Orientation
        },
        ..SyntheticShape::default()
    };
    let calibrate_at = shape.lead_in_ms / 2;

    let feed = Arc::new(SensorFeed::new());
    let start = Instant::now();
    let _producer = tokio::spawn(host_sensor_loop(feed.clone(), shape, start));

    let mut ctx = EngineContext::new(config, 0)?;
    let mut ticker = interval(Duration::from_millis(tick_ms.max(1)));
    let mut calibrated = false;
    let mut last_status_ms = 0u64;
    let status_path = format!("{}/live_status.json", output_dir);

    println!("[{}] Simulated host running...", ts_now());

    loop {
        ticker.tick().await;
        let now_ms = start.elapsed().as_millis() as u64;

        if duration > 0 && now_ms >= duration * 1000 {
            println!("[{}] Duration reached, stopping...", ts_now());
            break;
        }

        if !calibrated && now_ms >= calibrate_at {
            match ctx.calibrate(now_ms) {
                Ok(Some(outcome)) => println!(
                    "[{}] Calibrated neutral {:.1}°",
                    ts_now(),
                    outcome.neutral_angle_deg
                ),
                Ok(None) => println!("[{}] Calibration window started", ts_now()),
                Err(e) => log::warn!("Calibration request failed: {}", e),
            }
            calibrated = true;
        }

        let mut goal_reached = false;
        for event in ctx.step_with_feed(now_ms, &feed) {
            match event {
                EngineEvent::FilteredAngleUpdated { .. } => {}
                EngineEvent::GoalReached { .. } => {
                    goal_reached = true;
                    println!("[{}] {}", ts_now(), describe(&event));
                }
                _ => println!("[{}] {}", ts_now(), describe(&event)),
            }
        }

        if now_ms - last_status_ms >= 2000 {
            let status = LiveStatus::from_context(&ctx, now_ms);
            println!("[{}] {}", ts_now(), status.summary());
            if let Err(e) = status.save(&status_path) {
                log::warn!("Failed to write {}: {}", status_path, e);
            }
            last_status_ms = now_ms;
        }

        if duration == 0 && goal_reached {
            break;
        }
    }

    let now_ms = start.elapsed().as_millis() as u64;
    let final_status = LiveStatus::from_context(&ctx, now_ms);
    final_status.save(&format!("{}/live_status_final.json", output_dir))?;

    println!("\n=== Final Stats ===");
    println!("Reps: {}/{}", final_status.reps, final_status.goal);
    println!("Ticks: {}", final_status.ticks);
    println!("Neutral angle: {:.2}°", final_status.neutral_angle_deg);
    Ok(())
}

/// Stands in for the platform's sensor callbacks: pushes readings at its
/// own cadence, independent of the tick
async fn host_sensor_loop(feed: Arc<SensorFeed>, shape: SyntheticShape, start: Instant) {
    let mut sample_count = 0u64;
    loop {
        sleep(Duration::from_millis(shape.sample_interval_ms.max(1))).await;
        let t = start.elapsed().as_millis() as u64;
        let angle = shape.angle_at(t);

        let pushed = match shape.source {
            SignalSource::Acceleration => {
                let rad = angle.to_radians();
                feed.push_acceleration(AccelSample::new(0.0, 9.81 * rad.sin(), 9.81 * rad.cos(), t))
            }
            _ => feed.push_orientation(OrientationSample::new(angle, t)),
        };
        if let Err(e) = pushed {
            log::warn!("[sensor] {}", e);
        }

        sample_count += 1;
        if sample_count % 250 == 0 {
            log::debug!("[sensor] {} samples", sample_count);
        }
    }
}

fn describe(event: &EngineEvent) -> String {
    match event {
        EngineEvent::FilteredAngleUpdated { angle_deg } => format!("angle {:.1}°", angle_deg),
        EngineEvent::PhaseChanged { phase } => format!("phase -> {}", phase.as_str()),
        EngineEvent::RepCompleted {
            rep_index,
            timestamp_ms,
        } => format!("REP {} at {}ms", rep_index, timestamp_ms),
        EngineEvent::GoalReached { reps } => format!("GOAL reached ({} reps)", reps),
        EngineEvent::SignalActiveChanged { active } => {
            if *active {
                "signal active".to_string()
            } else {
                "signal lost".to_string()
            }
        }
        EngineEvent::CalibrationCompleted {
            neutral_angle_deg,
            samples,
        } => format!(
            "calibrated neutral {:.1}° from {} samples",
            neutral_angle_deg, samples
        ),
        EngineEvent::CalibrationFailed { reason } => format!("calibration failed: {}", reason),
        EngineEvent::CalibrationCancelled => "calibration cancelled".to_string(),
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
