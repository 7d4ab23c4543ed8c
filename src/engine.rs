//! Per-tick pipeline: resolve → smooth → subtract baseline → detect → count.
//!
//! All engine state lives in one owned `EngineContext`. Sensor callbacks only
//! write into a `SensorFeed`; the tick is the sole reader and the only place
//! the session is mutated, so ordering is deterministic and the whole
//! pipeline can be driven from tests with plain values.

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationOutcome, CalibrationPolicy, CalibrationStore};
use crate::config::{clamp_threshold, EngineConfig};
use crate::detector::MotionPhase;
use crate::error::{EngineResult, RepTrackerError};
use crate::health_monitor::{HealthReport, SignalHealth};
use crate::sensors::{
    resolve_angle, AccelSample, OrientationSample, SensorFeed, SensorSample, SignalSource,
};
use crate::session::{RepSession, SessionState};
use crate::smoothing::AngleSmoother;

/// Output of the engine, consumed by UI, audio and progress components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    FilteredAngleUpdated { angle_deg: f64 },
    PhaseChanged { phase: MotionPhase },
    RepCompleted { rep_index: u32, timestamp_ms: u64 },
    GoalReached { reps: u32 },
    SignalActiveChanged { active: bool },
    CalibrationCompleted { neutral_angle_deg: f64, samples: u32 },
    CalibrationFailed { reason: String },
    CalibrationCancelled,
}

/// Everything one exercise needs. A new exercise gets a new context, so
/// the calibration baseline never leaks between exercises.
#[derive(Debug, Clone)]
pub struct EngineContext {
    config: EngineConfig,
    smoother: AngleSmoother,
    calibration: CalibrationStore,
    health: SignalHealth,
    session: RepSession,
    last_sample: SensorSample,
    ticks: u64,
}

impl EngineContext {
    pub fn new(config: EngineConfig, started_ms: u64) -> EngineResult<Self> {
        let config = config.validated()?;
        Ok(EngineContext {
            smoother: AngleSmoother::new(config.alpha)?,
            calibration: CalibrationStore::new(config.calibration),
            health: SignalHealth::new(config.stale_timeout_ms),
            session: RepSession::new(config.goal, config.detector_config(), started_ms)?,
            last_sample: SensorSample::unavailable(started_ms),
            ticks: 0,
            config,
        })
    }

    /// Run one tick against the latest values held by `feed`
    pub fn step_with_feed(&mut self, now_ms: u64, feed: &SensorFeed) -> Vec<EngineEvent> {
        self.step(
            now_ms,
            feed.latest_orientation(),
            feed.latest_acceleration(),
        )
    }

    /// Run one tick with explicit latest samples
    pub fn step(
        &mut self,
        now_ms: u64,
        orientation: Option<OrientationSample>,
        accel: Option<AccelSample>,
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        self.ticks += 1;

        // Stage 1: staleness
        self.health.observe(now_ms, orientation.as_ref(), accel.as_ref());
        if let Some(active) = self.health.poll(now_ms) {
            events.push(EngineEvent::SignalActiveChanged { active });
        }
        let orientation =
            orientation.filter(|_| self.health.is_fresh(SignalSource::Orientation, now_ms));
        let accel = accel.filter(|_| self.health.is_fresh(SignalSource::Acceleration, now_ms));

        // Stage 2: resolve, smoothing runs even while paused
        let sample = resolve_angle(orientation.as_ref(), accel.as_ref());
        self.last_sample = sample;
        if sample.is_available() {
            self.smoother.apply(sample.angle_deg);
        }
        let filtered = self.smoother.value();
        if let Some(angle_deg) = filtered {
            events.push(EngineEvent::FilteredAngleUpdated { angle_deg });
        }

        // Stage 3: calibration window, if one is open
        let raw = sample.is_available().then_some(sample.angle_deg);
        match self.calibration.feed(now_ms, raw) {
            None => {}
            Some(Ok(outcome)) => {
                events.push(EngineEvent::CalibrationCompleted {
                    neutral_angle_deg: outcome.neutral_angle_deg,
                    samples: outcome.samples,
                });
                if self.rebase_phase() {
                    events.push(EngineEvent::PhaseChanged {
                        phase: MotionPhase::Neutral,
                    });
                }
            }
            Some(Err(e)) => events.push(EngineEvent::CalibrationFailed {
                reason: e.to_string(),
            }),
        }

        // Stage 4: detection, only on a live signal and a settled baseline
        let filtered = match filtered {
            Some(angle) if sample.is_available() && !self.calibration.is_calibrating() => angle,
            _ => return events,
        };
        let update = self
            .session
            .update(self.calibration.relative(filtered), now_ms);
        if let Some(phase) = update.phase_changed {
            events.push(EngineEvent::PhaseChanged { phase });
        }
        if let Some(rep_index) = update.rep_completed {
            events.push(EngineEvent::RepCompleted {
                rep_index,
                timestamp_ms: now_ms,
            });
        }
        if update.goal_reached {
            events.push(EngineEvent::GoalReached {
                reps: self.session.reps(),
            });
        }

        events
    }

    /// Establish the neutral angle with the configured policy.
    ///
    /// Instantaneous calibration returns its outcome straight away. The
    /// windowed policy returns `Ok(None)` and reports through a later
    /// tick's `CalibrationCompleted` / `CalibrationFailed` event.
    pub fn calibrate(&mut self, now_ms: u64) -> EngineResult<Option<CalibrationOutcome>> {
        match self.calibration.policy() {
            CalibrationPolicy::Instantaneous => {
                let outcome = self.calibration.calibrate_now(self.smoother.value())?;
                self.rebase_phase();
                Ok(Some(outcome))
            }
            CalibrationPolicy::Windowed { .. } => {
                self.calibration.start_window(now_ms)?;
                Ok(None)
            }
        }
    }

    /// A new baseline invalidates any bend measured against the old one.
    /// Returns true when a `Bent` phase was dropped.
    fn rebase_phase(&mut self) -> bool {
        let was_bent = self.session.phase() == MotionPhase::Bent;
        if was_bent {
            log::info!("Baseline moved mid-bend, phase back to neutral");
        }
        self.session.reset_phase();
        was_bent
    }

    /// Abandon an in-flight window; the baseline is unchanged
    pub fn cancel_calibration(&mut self) -> Option<EngineEvent> {
        self.calibration
            .cancel()
            .then_some(EngineEvent::CalibrationCancelled)
    }

    pub fn reset(&mut self) {
        log::info!("Session reset at {} reps", self.session.reps());
        self.session.reset();
    }

    pub fn set_goal(&mut self, goal: u32) -> u32 {
        let goal = self.session.set_goal(goal);
        self.config.goal = goal;
        goal
    }

    /// Clamp into range, then refuse if it would break the hysteresis gap
    pub fn set_threshold(&mut self, threshold_deg: f64) -> EngineResult<f64> {
        let threshold = clamp_threshold(threshold_deg)?;
        self.session.set_threshold(threshold)?;
        self.config.threshold_deg = threshold;
        Ok(threshold)
    }

    pub fn pause(&mut self) -> EngineResult<()> {
        self.session.pause()
    }

    pub fn resume(&mut self) -> EngineResult<()> {
        self.session.resume()
    }

    /// Filtered tilt, or `SignalUnavailable` before the first valid sample
    pub fn current_angle(&self) -> EngineResult<f64> {
        self.smoother
            .value()
            .ok_or(RepTrackerError::SignalUnavailable)
    }

    /// Filtered tilt relative to the neutral baseline
    pub fn relative_angle(&self) -> EngineResult<f64> {
        self.current_angle()
            .map(|angle| self.calibration.relative(angle))
    }

    pub fn signal_source(&self) -> SignalSource {
        self.last_sample.source
    }

    pub fn last_sample(&self) -> SensorSample {
        self.last_sample
    }

    pub fn is_signal_active(&self) -> bool {
        self.health.is_active()
    }

    pub fn health_report(&self, now_ms: u64) -> HealthReport {
        self.health.check_health(now_ms)
    }

    pub fn reps(&self) -> u32 {
        self.session.reps()
    }

    pub fn goal(&self) -> u32 {
        self.session.goal()
    }

    pub fn phase(&self) -> MotionPhase {
        self.session.phase()
    }

    pub fn progress(&self) -> f64 {
        self.session.progress()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &RepSession {
        &self.session
    }

    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Pure form of one tick: consumes the context and hands back the
/// successor together with the events it produced
pub fn tick(
    mut context: EngineContext,
    now_ms: u64,
    feed: &SensorFeed,
) -> (EngineContext, Vec<EngineEvent>) {
    let events = context.step_with_feed(now_ms, feed);
    (context, events)
}
