use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::calibration::CalibrationPolicy;
use crate::detector::{DetectorConfig, FirstRepDebounce};
use crate::error::{EngineResult, RepTrackerError};
use crate::session::clamp_goal;

pub const THRESHOLD_MIN_DEG: f64 = 10.0;
pub const THRESHOLD_MAX_DEG: f64 = 60.0;

/// Engine tuning. Values from files or flags go through `validated`
/// before reaching the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub goal: u32,
    pub threshold_deg: f64,
    pub hysteresis_deg: f64,
    pub min_rep_interval_ms: u64,
    /// Smoothing factor, fixed per session
    pub alpha: f64,
    /// Silence after which a sensor feed counts as stale
    pub stale_timeout_ms: u64,
    pub calibration: CalibrationPolicy,
    pub first_rep: FirstRepDebounce,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            goal: 10,
            threshold_deg: 30.0,
            hysteresis_deg: 6.0,
            min_rep_interval_ms: 400,
            alpha: 0.12,
            stale_timeout_ms: 2000,
            calibration: CalibrationPolicy::Instantaneous,
            first_rep: FirstRepDebounce::FromSessionStart,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing keys take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            RepTrackerError::InvalidConfiguration(format!("{}: {}", path.display(), e))
        })?;
        let config: EngineConfig = serde_json::from_str(&text).map_err(|e| {
            RepTrackerError::InvalidConfiguration(format!("{}: {}", path.display(), e))
        })?;
        config.validated()
    }

    /// Clamp goal and threshold into range; refuse anything that cannot
    /// be clamped into a safe shape
    pub fn validated(mut self) -> EngineResult<Self> {
        self.goal = clamp_goal(self.goal);
        self.threshold_deg = clamp_threshold(self.threshold_deg)?;

        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(RepTrackerError::InvalidConfiguration(format!(
                "alpha {} outside (0, 1]",
                self.alpha
            )));
        }
        if let CalibrationPolicy::Windowed { samples: 0, .. } = self.calibration {
            return Err(RepTrackerError::InvalidConfiguration(
                "calibration window needs at least one sample".to_string(),
            ));
        }
        if self.stale_timeout_ms == 0 {
            return Err(RepTrackerError::InvalidConfiguration(
                "stale_timeout_ms must be positive".to_string(),
            ));
        }
        self.detector_config().validate()?;
        Ok(self)
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            threshold_deg: self.threshold_deg,
            hysteresis_deg: self.hysteresis_deg,
            min_rep_interval_ms: self.min_rep_interval_ms,
            first_rep: self.first_rep,
        }
    }
}

/// Clamp a user-facing threshold into [10, 60]
pub fn clamp_threshold(requested: f64) -> EngineResult<f64> {
    if !requested.is_finite() {
        return Err(RepTrackerError::InvalidConfiguration(format!(
            "threshold {} is not finite",
            requested
        )));
    }
    let threshold = requested.clamp(THRESHOLD_MIN_DEG, THRESHOLD_MAX_DEG);
    if threshold != requested {
        log::warn!("Threshold {}° out of range, clamped to {}°", requested, threshold);
    }
    Ok(threshold)
}
