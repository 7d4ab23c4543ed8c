use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, RepTrackerError};

pub const DEFAULT_WINDOW_SAMPLES: u32 = 24;
pub const DEFAULT_WINDOW_INTERVAL_MS: u64 = 12;

/// How `calibrate` establishes the neutral angle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CalibrationPolicy {
    /// Take the current filtered angle as neutral
    #[default]
    Instantaneous,
    /// Average `samples` raw readings spaced `interval_ms` apart
    Windowed { samples: u32, interval_ms: u64 },
}

impl CalibrationPolicy {
    pub fn windowed_default() -> Self {
        CalibrationPolicy::Windowed {
            samples: DEFAULT_WINDOW_SAMPLES,
            interval_ms: DEFAULT_WINDOW_INTERVAL_MS,
        }
    }

    /// Window shape; an explicit window request under the instantaneous
    /// policy uses the default shape
    pub fn window_params(&self) -> (u32, u64) {
        match *self {
            CalibrationPolicy::Windowed {
                samples,
                interval_ms,
            } => (samples, interval_ms),
            CalibrationPolicy::Instantaneous => {
                (DEFAULT_WINDOW_SAMPLES, DEFAULT_WINDOW_INTERVAL_MS)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationBaseline {
    pub neutral_angle_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub neutral_angle_deg: f64,
    pub samples: u32,
}

/// In-flight windowed collection. Lives only between start and
/// complete/cancel; driven by tick time rather than its own timer.
#[derive(Debug, Clone)]
pub struct CalibrationWindow {
    target_attempts: u32,
    interval_ms: u64,
    attempts: u32,
    collected: Vec<f64>,
    next_attempt_ms: u64,
}

impl CalibrationWindow {
    fn new(target_attempts: u32, interval_ms: u64, started_ms: u64) -> Self {
        CalibrationWindow {
            target_attempts,
            interval_ms,
            attempts: 0,
            collected: Vec::with_capacity(target_attempts as usize),
            next_attempt_ms: started_ms,
        }
    }

    /// Take at most one reading per call once the interval has elapsed.
    /// `None` readings count as an attempt but contribute nothing.
    fn attempt(&mut self, now_ms: u64, raw_angle_deg: Option<f64>) -> bool {
        if now_ms < self.next_attempt_ms {
            return false;
        }
        self.attempts += 1;
        if let Some(angle) = raw_angle_deg.filter(|a| a.is_finite()) {
            self.collected.push(angle);
        }
        self.next_attempt_ms = now_ms + self.interval_ms;
        true
    }

    fn is_done(&self) -> bool {
        self.attempts >= self.target_attempts
    }

    fn mean(&self) -> Option<f64> {
        if self.collected.is_empty() {
            return None;
        }
        Some(self.collected.iter().sum::<f64>() / self.collected.len() as f64)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn collected(&self) -> usize {
        self.collected.len()
    }
}

/// Holds the neutral baseline and any calibration in flight
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    baseline: CalibrationBaseline,
    policy: CalibrationPolicy,
    calibrated: bool,
    window: Option<CalibrationWindow>,
}

impl CalibrationStore {
    pub fn new(policy: CalibrationPolicy) -> Self {
        CalibrationStore {
            baseline: CalibrationBaseline::default(),
            policy,
            calibrated: false,
            window: None,
        }
    }

    pub fn policy(&self) -> CalibrationPolicy {
        self.policy
    }

    pub fn baseline(&self) -> CalibrationBaseline {
        self.baseline
    }

    pub fn neutral_angle_deg(&self) -> f64 {
        self.baseline.neutral_angle_deg
    }

    /// Angle relative to neutral; identical to the input until calibrated
    pub fn relative(&self, angle_deg: f64) -> f64 {
        angle_deg - self.baseline.neutral_angle_deg
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn is_calibrating(&self) -> bool {
        self.window.is_some()
    }

    pub fn window(&self) -> Option<&CalibrationWindow> {
        self.window.as_ref()
    }

    /// Instantaneous policy: adopt the current filtered angle
    pub fn calibrate_now(&mut self, filtered_angle_deg: Option<f64>) -> EngineResult<CalibrationOutcome> {
        if self.window.is_some() {
            return Err(RepTrackerError::CalibrationInProgress);
        }
        let angle = filtered_angle_deg
            .filter(|a| a.is_finite())
            .ok_or_else(|| {
                RepTrackerError::CalibrationFailed("no valid filtered angle yet".to_string())
            })?;
        Ok(self.commit(angle, 1))
    }

    /// Windowed policy: open a collection window. A second request while
    /// one is open is refused, never interleaved.
    pub fn start_window(&mut self, now_ms: u64) -> EngineResult<()> {
        if self.window.is_some() {
            return Err(RepTrackerError::CalibrationInProgress);
        }
        let (samples, interval_ms) = self.policy.window_params();
        if samples == 0 {
            return Err(RepTrackerError::InvalidConfiguration(
                "calibration window needs at least one sample".to_string(),
            ));
        }
        log::info!(
            "Calibration window opened at {}ms ({} samples every {}ms)",
            now_ms,
            samples,
            interval_ms
        );
        self.window = Some(CalibrationWindow::new(samples, interval_ms, now_ms));
        Ok(())
    }

    /// Drop partial samples; the baseline is untouched
    pub fn cancel(&mut self) -> bool {
        match self.window.take() {
            Some(window) => {
                log::info!(
                    "Calibration cancelled after {} attempts ({} valid)",
                    window.attempts(),
                    window.collected()
                );
                true
            }
            None => false,
        }
    }

    /// Feed the current raw reading into an open window.
    ///
    /// Returns `None` while the window is still collecting (or none is
    /// open), and the final result once every attempt has been made.
    pub fn feed(
        &mut self,
        now_ms: u64,
        raw_angle_deg: Option<f64>,
    ) -> Option<EngineResult<CalibrationOutcome>> {
        let window = self.window.as_mut()?;
        if !window.attempt(now_ms, raw_angle_deg) || !window.is_done() {
            return None;
        }

        let window = self.window.take()?;
        let result = match window.mean() {
            Some(mean) => Ok(self.commit(mean, window.collected() as u32)),
            None => {
                log::warn!(
                    "Calibration failed: 0 valid samples in {} attempts",
                    window.attempts()
                );
                Err(RepTrackerError::CalibrationFailed(format!(
                    "0 valid samples in {} attempts",
                    window.attempts()
                )))
            }
        };
        Some(result)
    }

    fn commit(&mut self, neutral_angle_deg: f64, samples: u32) -> CalibrationOutcome {
        self.baseline.neutral_angle_deg = neutral_angle_deg;
        self.calibrated = true;
        log::info!(
            "Calibration complete: neutral {:.2}° ({} samples)",
            neutral_angle_deg,
            samples
        );
        CalibrationOutcome {
            neutral_angle_deg,
            samples,
        }
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new(CalibrationPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn windowed(samples: u32) -> CalibrationStore {
        CalibrationStore::new(CalibrationPolicy::Windowed {
            samples,
            interval_ms: 12,
        })
    }

    #[test]
    fn test_uncalibrated_baseline_is_zero() {
        let store = CalibrationStore::default();
        assert!(!store.is_calibrated());
        assert_eq!(store.relative(17.5), 17.5);
    }

    #[test]
    fn test_instantaneous() {
        let mut store = CalibrationStore::default();
        let outcome = store.calibrate_now(Some(12.0)).unwrap();
        assert_eq!(outcome.neutral_angle_deg, 12.0);
        assert!(store.is_calibrated());
        assert_relative_eq!(store.relative(40.0), 28.0);
    }

    #[test]
    fn test_instantaneous_without_signal_keeps_baseline() {
        let mut store = CalibrationStore::default();
        store.calibrate_now(Some(5.0)).unwrap();
        let err = store.calibrate_now(None).unwrap_err();
        assert!(matches!(err, RepTrackerError::CalibrationFailed(_)));
        assert_eq!(store.neutral_angle_deg(), 5.0);

        assert!(store.calibrate_now(Some(f64::NAN)).is_err());
        assert_eq!(store.neutral_angle_deg(), 5.0);
    }

    #[test]
    fn test_window_averages() {
        let mut store = windowed(4);
        store.start_window(0).unwrap();
        assert!(store.is_calibrating());

        assert!(store.feed(0, Some(10.0)).is_none());
        // Too early for the next attempt
        assert!(store.feed(5, Some(100.0)).is_none());
        assert_eq!(store.window().map(|w| w.attempts()), Some(1));
        assert!(store.feed(16, Some(12.0)).is_none());
        assert!(store.feed(32, None).is_none());
        let outcome = store.feed(48, Some(14.0)).unwrap().unwrap();

        assert_relative_eq!(outcome.neutral_angle_deg, 12.0);
        assert_eq!(outcome.samples, 3);
        assert!(!store.is_calibrating());
        assert_eq!(store.neutral_angle_deg(), 12.0);
    }

    #[test]
    fn test_window_with_no_valid_samples_fails() {
        let mut store = windowed(3);
        store.calibrate_now(Some(7.0)).unwrap();
        store.start_window(0).unwrap();
        assert!(store.feed(0, None).is_none());
        assert!(store.feed(16, Some(f64::NAN)).is_none());
        let result = store.feed(32, None).unwrap();
        assert!(matches!(result, Err(RepTrackerError::CalibrationFailed(_))));
        assert_eq!(store.neutral_angle_deg(), 7.0);
        assert!(!store.is_calibrating());
    }

    #[test]
    fn test_window_is_not_reentrant() {
        let mut store = windowed(24);
        store.start_window(0).unwrap();
        store.feed(0, Some(3.0));
        assert_eq!(
            store.start_window(10),
            Err(RepTrackerError::CalibrationInProgress)
        );
        assert_eq!(
            store.calibrate_now(Some(1.0)),
            Err(RepTrackerError::CalibrationInProgress)
        );
        // The original window kept its progress
        assert_eq!(store.window().map(|w| w.collected()), Some(1));
    }

    #[test]
    fn test_cancel_discards() {
        let mut store = windowed(2);
        store.calibrate_now(Some(-4.0)).unwrap();
        store.start_window(0).unwrap();
        store.feed(0, Some(30.0));
        assert!(store.cancel());
        assert!(!store.cancel());
        assert_eq!(store.neutral_angle_deg(), -4.0);
        assert!(store.feed(20, Some(30.0)).is_none());
        assert!(store.start_window(40).is_ok());
    }

    #[test]
    fn test_zero_sample_window_rejected() {
        let mut store = windowed(0);
        assert!(matches!(
            store.start_window(0),
            Err(RepTrackerError::InvalidConfiguration(_))
        ));
        assert!(!store.is_calibrating());
    }
}
