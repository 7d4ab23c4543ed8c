use std::path::PathBuf;

use clap::Parser;
use rep_tracker_rs::sensors::SignalSource;
use rep_tracker_rs::trace::{SensorTrace, SyntheticShape, TraceEvent};

/// Write a synthetic exercise recording for `rep_tracker replay`
#[derive(Parser, Debug)]
struct Args {
    /// Output path (.json or .json.gz)
    #[arg(long, default_value = "synthetic_trace.json.gz")]
    out: PathBuf,

    /// Number of bend-and-return cycles
    #[arg(long, default_value = "10")]
    cycles: u32,

    /// Peak bend above neutral in degrees
    #[arg(long, default_value = "50.0")]
    bend_deg: f64,

    /// Resting tilt in degrees
    #[arg(long, default_value = "15.0")]
    neutral_deg: f64,

    /// Bend duration per cycle (ms)
    #[arg(long, default_value = "1200")]
    bend_ms: u64,

    /// Rest at neutral between cycles (ms)
    #[arg(long, default_value = "600")]
    rest_ms: u64,

    /// Jitter amplitude in degrees
    #[arg(long, default_value = "2.0")]
    jitter_deg: f64,

    /// Sensor event period (ms)
    #[arg(long, default_value = "20")]
    sample_ms: u64,

    /// Tick period recorded in the trace (ms)
    #[arg(long, default_value = "16")]
    tick_ms: u64,

    /// Emit acceleration events instead of orientation
    #[arg(long)]
    accel: bool,

    /// Drop every Nth sample as NaN to exercise sample rejection (0 = never)
    #[arg(long, default_value = "0")]
    nan_every: usize,

    /// Skip the calibrate command
    #[arg(long, default_value_t = false)]
    no_calibrate: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let shape = SyntheticShape {
        cycles: args.cycles,
        bend_ms: args.bend_ms,
        rest_ms: args.rest_ms,
        bend_deg: args.bend_deg,
        neutral_deg: args.neutral_deg,
        jitter_deg: args.jitter_deg,
        sample_interval_ms: args.sample_ms,
        source: if args.accel {
            SignalSource::Acceleration
        } else {
            SignalSource::Orientation
        },
        calibrate: !args.no_calibrate,
        ..SyntheticShape::default()
    };

    let mut trace: SensorTrace = shape.synthesize(args.tick_ms);
    if args.nan_every > 0 {
        poison_samples(&mut trace, args.nan_every);
    }

    trace.save(&args.out)?;
    log::info!(
        "Wrote {} events ({} cycles, {:.1}s) to {}",
        trace.events.len(),
        args.cycles,
        shape.duration_ms() as f64 / 1000.0,
        args.out.display()
    );
    Ok(())
}

fn poison_samples(trace: &mut SensorTrace, every: usize) {
    for (i, event) in trace.events.iter_mut().enumerate() {
        if (i + 1) % every != 0 {
            continue;
        }
        match event {
            TraceEvent::Orientation(s) => s.beta_deg = f64::NAN,
            TraceEvent::Acceleration(s) => s.z = f64::NAN,
            _ => {}
        }
    }
}
