use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::detector::MotionPhase;
use crate::engine::EngineContext;
use crate::sensors::SignalSource;
use crate::session::SessionState;

/// Snapshot of the engine for UI consumers and status files
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub tick_ms: u64,
    pub ticks: u64,
    // Counter
    pub reps: u32,
    pub goal: u32,
    pub progress: f64,
    pub goal_reached: bool,
    pub phase: MotionPhase,
    pub session_state: SessionState,
    // Angle
    pub filtered_angle_deg: Option<f64>,
    pub relative_angle_deg: Option<f64>,
    pub neutral_angle_deg: f64,
    pub calibrated: bool,
    pub calibrating: bool,
    // Signal
    pub signal_source: SignalSource,
    pub signal_active: bool,
    pub orientation_healthy: bool,
    pub accel_healthy: bool,
    pub orientation_silence_ms: Option<u64>,
    pub accel_silence_ms: Option<u64>,
}

impl LiveStatus {
    pub fn from_context(ctx: &EngineContext, now_ms: u64) -> Self {
        let health = ctx.health_report(now_ms);
        let session = ctx.session();
        let calibration = ctx.calibration();
        Self {
            timestamp: current_timestamp(),
            tick_ms: now_ms,
            ticks: ctx.ticks(),
            reps: session.reps(),
            goal: session.goal(),
            progress: session.progress(),
            goal_reached: session.is_goal_reached(),
            phase: session.phase(),
            session_state: session.state(),
            filtered_angle_deg: ctx.current_angle().ok(),
            relative_angle_deg: ctx.relative_angle().ok(),
            neutral_angle_deg: calibration.neutral_angle_deg(),
            calibrated: calibration.is_calibrated(),
            calibrating: calibration.is_calibrating(),
            signal_source: ctx.signal_source(),
            signal_active: ctx.is_signal_active(),
            orientation_healthy: health.orientation_healthy,
            accel_healthy: health.accel_healthy,
            orientation_silence_ms: health.orientation_silence_ms,
            accel_silence_ms: health.accel_silence_ms,
        }
    }

    /// One-line summary for the terminal
    pub fn summary(&self) -> String {
        let angle = self
            .relative_angle_deg
            .map(|a| format!("{:+6.1}°", a))
            .unwrap_or_else(|| "   --  ".to_string());
        format!(
            "reps {:>3}/{:<3} | {:<7} | angle {} | signal {}{}",
            self.reps,
            self.goal,
            self.phase.as_str(),
            angle,
            self.signal_source.as_str(),
            if self.signal_active { "" } else { " (no signal)" }
        )
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
