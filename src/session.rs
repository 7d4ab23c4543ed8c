use serde::{Deserialize, Serialize};

use crate::detector::{DetectorConfig, MotionPhase, PhaseTransition, RepDetector};
use crate::error::{EngineResult, RepTrackerError};

pub const GOAL_MIN: u32 = 1;
pub const GOAL_MAX: u32 = 200;

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Counting reps
    Active,
    /// Filter keeps running, detector is not evaluated
    Paused,
}

/// Clamp a requested goal into the supported range
pub fn clamp_goal(requested: u32) -> u32 {
    let goal = requested.clamp(GOAL_MIN, GOAL_MAX);
    if goal != requested {
        log::warn!("Goal {} out of range, clamped to {}", requested, goal);
    }
    goal
}

/// What one tick did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionUpdate {
    pub phase_changed: Option<MotionPhase>,
    /// 1-based index of the rep just counted
    pub rep_completed: Option<u32>,
    pub goal_reached: bool,
}

/// Goal-bounded rep counter wrapped around the detector.
///
/// `reps` only goes down through `reset` or a lowered goal.
#[derive(Debug, Clone)]
pub struct RepSession {
    reps: u32,
    goal: u32,
    state: SessionState,
    started_ms: u64,
    detector: RepDetector,
}

impl RepSession {
    pub fn new(goal: u32, detector_config: DetectorConfig, started_ms: u64) -> EngineResult<Self> {
        Ok(RepSession {
            reps: 0,
            goal: clamp_goal(goal),
            state: SessionState::Active,
            started_ms,
            detector: RepDetector::new(detector_config, started_ms)?,
        })
    }

    /// Feed the baseline-relative filtered angle for one tick
    pub fn update(&mut self, relative_angle_deg: f64, now_ms: u64) -> SessionUpdate {
        let mut update = SessionUpdate::default();
        if self.state == SessionState::Paused {
            return update;
        }

        match self.detector.update(relative_angle_deg, now_ms) {
            None => {}
            Some(PhaseTransition::EnteredBent) => {
                update.phase_changed = Some(MotionPhase::Bent);
            }
            Some(PhaseTransition::Completed { at_ms }) => {
                update.phase_changed = Some(MotionPhase::Neutral);
                if self.reps < self.goal {
                    self.reps += 1;
                    update.rep_completed = Some(self.reps);
                    log::info!("Rep {}/{} at {}ms", self.reps, self.goal, at_ms);
                    if self.reps == self.goal {
                        update.goal_reached = true;
                        log::info!("Goal of {} reps reached", self.goal);
                    }
                }
            }
        }
        update
    }

    /// Zero the count and return to `Neutral`. Goal, thresholds and the
    /// calibration baseline are untouched.
    pub fn reset(&mut self) {
        self.reps = 0;
        self.detector.reset_phase();
    }

    /// Drop a half-finished bend without touching the count. Used when
    /// the baseline moves under the detector.
    pub fn reset_phase(&mut self) {
        self.detector.reset_phase();
    }

    /// Change the goal mid-session; the count is clamped, not reset
    pub fn set_goal(&mut self, requested: u32) -> u32 {
        self.goal = clamp_goal(requested);
        if self.reps > self.goal {
            self.reps = self.goal;
        }
        self.goal
    }

    pub fn set_threshold(&mut self, threshold_deg: f64) -> EngineResult<()> {
        self.detector.set_threshold(threshold_deg)
    }

    /// Transition to Paused state (Active → Paused)
    pub fn pause(&mut self) -> EngineResult<()> {
        match self.state {
            SessionState::Active => {
                self.state = SessionState::Paused;
                Ok(())
            }
            SessionState::Paused => Err(RepTrackerError::InvalidState(
                "Already paused".to_string(),
            )),
        }
    }

    /// Transition to Active state (Paused → Active)
    pub fn resume(&mut self) -> EngineResult<()> {
        match self.state {
            SessionState::Paused => {
                self.state = SessionState::Active;
                Ok(())
            }
            SessionState::Active => Err(RepTrackerError::InvalidState(
                "Not paused".to_string(),
            )),
        }
    }

    pub fn reps(&self) -> u32 {
        self.reps
    }

    pub fn goal(&self) -> u32 {
        self.goal
    }

    pub fn is_goal_reached(&self) -> bool {
        self.reps >= self.goal
    }

    /// Fraction of the goal done, in [0, 1]
    pub fn progress(&self) -> f64 {
        (self.reps as f64 / self.goal as f64).clamp(0.0, 1.0)
    }

    pub fn phase(&self) -> MotionPhase {
        self.detector.phase()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started_ms(&self) -> u64 {
        self.started_ms
    }

    pub fn detector(&self) -> &RepDetector {
        &self.detector
    }
}
