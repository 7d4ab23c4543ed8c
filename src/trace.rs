use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use crate::config::EngineConfig;
use crate::engine::{EngineContext, EngineEvent};
use crate::error::{EngineResult, RepTrackerError};
use crate::sensors::{AccelSample, OrientationSample, SensorFeed, SignalSource};

const GRAVITY: f64 = 9.81;

/// One recorded host event: a sensor reading or a user command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    Orientation(OrientationSample),
    Acceleration(AccelSample),
    Calibrate { timestamp_ms: u64 },
    CancelCalibration { timestamp_ms: u64 },
    Reset { timestamp_ms: u64 },
    Pause { timestamp_ms: u64 },
    Resume { timestamp_ms: u64 },
    SetGoal { timestamp_ms: u64, goal: u32 },
}

impl TraceEvent {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            TraceEvent::Orientation(s) => s.timestamp_ms,
            TraceEvent::Acceleration(s) => s.timestamp_ms,
            TraceEvent::Calibrate { timestamp_ms }
            | TraceEvent::CancelCalibration { timestamp_ms }
            | TraceEvent::Reset { timestamp_ms }
            | TraceEvent::Pause { timestamp_ms }
            | TraceEvent::Resume { timestamp_ms }
            | TraceEvent::SetGoal { timestamp_ms, .. } => *timestamp_ms,
        }
    }
}

/// Recorded session: host events plus the tick cadence they were seen at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorTrace {
    pub tick_interval_ms: u64,
    pub events: Vec<TraceEvent>,
}

impl SensorTrace {
    /// Load a `.json` or `.json.gz` trace
    pub fn load(path: &Path) -> EngineResult<Self> {
        let file = File::open(path)
            .map_err(|e| RepTrackerError::Trace(format!("{}: {}", path.display(), e)))?;
        let parsed = if path.extension().map(|e| e == "gz").unwrap_or(false) {
            let gz = GzDecoder::new(file);
            serde_json::from_reader(BufReader::new(gz))
        } else {
            serde_json::from_reader(BufReader::new(file))
        };
        parsed.map_err(|e| RepTrackerError::Trace(format!("{}: {}", path.display(), e)))
    }

    /// Write as pretty JSON, gzipped when the path ends in `.gz`
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let to_err = |e: std::io::Error| RepTrackerError::Trace(format!("{}: {}", path.display(), e));
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| RepTrackerError::Trace(e.to_string()))?;
        let mut file = File::create(path).map_err(to_err)?;
        if path.extension().map(|e| e == "gz").unwrap_or(false) {
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&json).map_err(to_err)?;
            encoder.finish().map_err(to_err)?;
        } else {
            file.write_all(&json).map_err(to_err)?;
        }
        Ok(())
    }

    /// Events in time order; ties keep their recorded order
    pub fn sorted_events(&self) -> Vec<TraceEvent> {
        let mut events = self.events.clone();
        events.sort_by_key(|e| e.timestamp_ms());
        events
    }
}

/// Shape of a synthetic exercise recording
#[derive(Debug, Clone)]
pub struct SyntheticShape {
    pub cycles: u32,
    pub lead_in_ms: u64,
    pub bend_ms: u64,
    pub rest_ms: u64,
    pub bend_deg: f64,
    pub neutral_deg: f64,
    pub jitter_deg: f64,
    pub sample_interval_ms: u64,
    pub source: SignalSource,
    /// Issue a calibrate command halfway through the lead-in
    pub calibrate: bool,
}

impl Default for SyntheticShape {
    fn default() -> Self {
        Self {
            cycles: 5,
            lead_in_ms: 1000,
            bend_ms: 1200,
            rest_ms: 600,
            bend_deg: 50.0,
            neutral_deg: 15.0,
            jitter_deg: 2.0,
            sample_interval_ms: 20,
            source: SignalSource::Orientation,
            calibrate: true,
        }
    }
}

impl SyntheticShape {
    /// Tilt at time `t`: Hann-shaped bend-and-return per cycle plus a
    /// deterministic two-tone jitter
    pub fn angle_at(&self, t: u64) -> f64 {
        let mut angle = self.neutral_deg;
        let cycle_ms = self.bend_ms + self.rest_ms;
        let active_ms = cycle_ms * self.cycles as u64;
        if t >= self.lead_in_ms && t - self.lead_in_ms < active_ms && self.bend_ms > 0 {
            let into_cycle = (t - self.lead_in_ms) % cycle_ms;
            if into_cycle < self.bend_ms {
                let x = 2.0 * std::f64::consts::PI * into_cycle as f64 / self.bend_ms as f64;
                angle += self.bend_deg * (0.5 - 0.5 * x.cos());
            }
        }
        let tf = t as f64;
        angle + self.jitter_deg * (0.6 * (tf * 0.037).sin() + 0.4 * (tf * 0.191).sin())
    }

    pub fn duration_ms(&self) -> u64 {
        2 * self.lead_in_ms + (self.bend_ms + self.rest_ms) * self.cycles as u64
    }

    pub fn synthesize(&self, tick_interval_ms: u64) -> SensorTrace {
        let mut events = Vec::new();
        let step = self.sample_interval_ms.max(1);
        let mut t = 0;
        while t <= self.duration_ms() {
            let angle = self.angle_at(t);
            events.push(match self.source {
                SignalSource::Acceleration => {
                    let rad = angle.to_radians();
                    TraceEvent::Acceleration(AccelSample::new(
                        0.0,
                        GRAVITY * rad.sin(),
                        GRAVITY * rad.cos(),
                        t,
                    ))
                }
                _ => TraceEvent::Orientation(OrientationSample::new(angle, t)),
            });
            t += step;
        }
        if self.calibrate {
            events.push(TraceEvent::Calibrate {
                timestamp_ms: self.lead_in_ms / 2,
            });
        }
        SensorTrace {
            tick_interval_ms,
            events,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub tick_ms: u64,
    pub event: EngineEvent,
}

/// Outcome of driving a recorded trace through the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub ticks: u64,
    pub reps: u32,
    pub goal: u32,
    pub rejected_samples: u32,
    pub command_errors: Vec<String>,
    pub events: Vec<TimedEvent>,
}

impl ReplayReport {
    pub fn rep_times(&self) -> Vec<u64> {
        self.events
            .iter()
            .filter_map(|e| match e.event {
                EngineEvent::RepCompleted { timestamp_ms, .. } => Some(timestamp_ms),
                _ => None,
            })
            .collect()
    }
}

/// Drive a trace through a fresh engine at the recorded tick cadence.
///
/// Samples that arrive between two ticks overwrite each other in the
/// feed; only the latest one is seen, as on a live host. Ticks continue
/// for `settle_ms` past the last event so the filter can settle.
pub fn replay(trace: &SensorTrace, config: EngineConfig, settle_ms: u64) -> EngineResult<ReplayReport> {
    if trace.tick_interval_ms == 0 {
        return Err(RepTrackerError::Trace("tick interval must be positive".to_string()));
    }
    let events = trace.sorted_events();
    let (start, last) = match (events.first(), events.last()) {
        (Some(first), Some(last)) => (first.timestamp_ms(), last.timestamp_ms()),
        _ => return Err(RepTrackerError::Trace("trace has no events".to_string())),
    };

    let mut ctx = EngineContext::new(config, start)?;
    let feed = SensorFeed::new();
    let mut report = ReplayReport {
        ticks: 0,
        reps: 0,
        goal: ctx.goal(),
        rejected_samples: 0,
        command_errors: Vec::new(),
        events: Vec::new(),
    };

    let mut next = 0;
    let mut now = start;
    while now <= last + settle_ms {
        while next < events.len() && events[next].timestamp_ms() <= now {
            apply_event(&mut ctx, &feed, &events[next], now, &mut report);
            next += 1;
        }
        for event in ctx.step_with_feed(now, &feed) {
            if !matches!(event, EngineEvent::FilteredAngleUpdated { .. }) {
                log::debug!("[{}ms] {:?}", now, event);
            }
            report.events.push(TimedEvent { tick_ms: now, event });
        }
        now += trace.tick_interval_ms;
    }

    report.ticks = ctx.ticks();
    report.reps = ctx.reps();
    report.goal = ctx.goal();
    Ok(report)
}

fn apply_event(
    ctx: &mut EngineContext,
    feed: &SensorFeed,
    event: &TraceEvent,
    now: u64,
    report: &mut ReplayReport,
) {
    let result = match event {
        TraceEvent::Orientation(s) => feed.push_orientation(*s).map_err(|e| {
            report.rejected_samples += 1;
            e
        }),
        TraceEvent::Acceleration(s) => feed.push_acceleration(*s).map_err(|e| {
            report.rejected_samples += 1;
            e
        }),
        TraceEvent::Calibrate { .. } => ctx.calibrate(now).map(|outcome| {
            if let Some(o) = outcome {
                report.events.push(TimedEvent {
                    tick_ms: now,
                    event: EngineEvent::CalibrationCompleted {
                        neutral_angle_deg: o.neutral_angle_deg,
                        samples: o.samples,
                    },
                });
            }
        }),
        TraceEvent::CancelCalibration { .. } => {
            if let Some(event) = ctx.cancel_calibration() {
                report.events.push(TimedEvent { tick_ms: now, event });
            }
            Ok(())
        }
        TraceEvent::Reset { .. } => {
            ctx.reset();
            Ok(())
        }
        TraceEvent::Pause { .. } => ctx.pause(),
        TraceEvent::Resume { .. } => ctx.resume(),
        TraceEvent::SetGoal { goal, .. } => {
            ctx.set_goal(*goal);
            Ok(())
        }
    };

    if let Err(e) = result {
        if !matches!(e, RepTrackerError::InvalidSample(_)) {
            log::warn!("[{}ms] command failed: {}", now, e);
            report.command_errors.push(e.to_string());
        }
    }
}
