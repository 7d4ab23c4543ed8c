use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, RepTrackerError};

/// Exponential low-pass state for the tilt angle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub filtered_angle_deg: f64,
    pub alpha: f64,
}

/// Exponential smoothing of the resolved tilt angle.
///
/// A small alpha favours noise rejection over latency: too large and jitter
/// crosses the bend threshold, too small and real transitions lag behind the
/// debounce interval.
#[derive(Debug, Clone)]
pub struct AngleSmoother {
    state: FilterState,
    initialized: bool,
}

impl AngleSmoother {
    /// Create a smoother; alpha must lie in (0, 1]
    pub fn new(alpha: f64) -> EngineResult<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(RepTrackerError::InvalidConfiguration(format!(
                "alpha {} outside (0, 1]",
                alpha
            )));
        }
        Ok(AngleSmoother {
            state: FilterState {
                filtered_angle_deg: 0.0,
                alpha,
            },
            initialized: false,
        })
    }

    /// `prev + alpha * (raw - prev)`; the first sample seeds the state
    pub fn apply(&mut self, raw_angle_deg: f64) -> f64 {
        if !self.initialized {
            self.state.filtered_angle_deg = raw_angle_deg;
            self.initialized = true;
            return raw_angle_deg;
        }

        self.state.filtered_angle_deg =
            ema_step(self.state.filtered_angle_deg, raw_angle_deg, self.state.alpha);
        self.state.filtered_angle_deg
    }

    pub fn value(&self) -> Option<f64> {
        self.initialized.then_some(self.state.filtered_angle_deg)
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

pub fn ema_step(prev_filtered: f64, raw: f64, alpha: f64) -> f64 {
    prev_filtered + alpha * (raw - prev_filtered)
}
