use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, RepTrackerError};

/// Where the limb is relative to its neutral angle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionPhase {
    Neutral,
    Bent,
}

impl MotionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionPhase::Neutral => "neutral",
            MotionPhase::Bent => "bent",
        }
    }
}

/// How the very first rep of a session is debounced.
///
/// `FromSessionStart` measures the first interval from the session start,
/// so a first rep finished within `min_rep_interval_ms` of starting is not
/// counted. `Exempt` never debounces the first rep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstRepDebounce {
    #[default]
    FromSessionStart,
    Exempt,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub threshold_deg: f64,
    pub hysteresis_deg: f64,
    pub min_rep_interval_ms: u64,
    pub first_rep: FirstRepDebounce,
}

impl DetectorConfig {
    /// Hysteresis must sit strictly inside the threshold, otherwise a
    /// noisy crossing can flip the phase without ever re-entering neutral
    pub fn validate(&self) -> EngineResult<()> {
        if !self.threshold_deg.is_finite() || !self.hysteresis_deg.is_finite() {
            return Err(RepTrackerError::InvalidConfiguration(
                "threshold and hysteresis must be finite".to_string(),
            ));
        }
        if self.hysteresis_deg < 0.0 {
            return Err(RepTrackerError::InvalidConfiguration(format!(
                "hysteresis {} is negative",
                self.hysteresis_deg
            )));
        }
        if self.hysteresis_deg >= self.threshold_deg {
            return Err(RepTrackerError::InvalidConfiguration(format!(
                "hysteresis {} >= threshold {}",
                self.hysteresis_deg, self.threshold_deg
            )));
        }
        Ok(())
    }
}

/// Phase change produced by one detector update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    /// Neutral -> Bent
    EnteredBent,
    /// Bent -> Neutral with the debounce satisfied: one rep
    Completed { at_ms: u64 },
}

/// Hysteresis + debounce state machine over the baseline-relative angle
#[derive(Debug, Clone)]
pub struct RepDetector {
    config: DetectorConfig,
    phase: MotionPhase,
    last_peak_ms: Option<u64>,
    last_tick_ms: Option<u64>,
}

impl RepDetector {
    pub fn new(config: DetectorConfig, session_start_ms: u64) -> EngineResult<Self> {
        config.validate()?;
        let last_peak_ms = match config.first_rep {
            FirstRepDebounce::FromSessionStart => Some(session_start_ms),
            FirstRepDebounce::Exempt => None,
        };
        Ok(RepDetector {
            config,
            phase: MotionPhase::Neutral,
            last_peak_ms,
            last_tick_ms: None,
        })
    }

    /// Evaluate one tick.
    ///
    /// A return into the hysteresis band before the debounce interval has
    /// elapsed leaves the phase at `Bent`; it is re-evaluated on later
    /// ticks, never credited retroactively.
    pub fn update(&mut self, relative_angle_deg: f64, now_ms: u64) -> Option<PhaseTransition> {
        let now_ms = self.monotonic(now_ms);
        let abs_rel = relative_angle_deg.abs();

        match self.phase {
            MotionPhase::Neutral => {
                if abs_rel >= self.config.threshold_deg {
                    self.phase = MotionPhase::Bent;
                    log::debug!("Phase neutral -> bent at {}ms ({:.1}°)", now_ms, abs_rel);
                    return Some(PhaseTransition::EnteredBent);
                }
                None
            }
            MotionPhase::Bent => {
                if abs_rel > self.config.hysteresis_deg {
                    return None;
                }
                if !self.debounce_elapsed(now_ms) {
                    return None;
                }
                self.phase = MotionPhase::Neutral;
                self.last_peak_ms = Some(now_ms);
                log::debug!("Phase bent -> neutral at {}ms ({:.1}°)", now_ms, abs_rel);
                Some(PhaseTransition::Completed { at_ms: now_ms })
            }
        }
    }

    fn debounce_elapsed(&self, now_ms: u64) -> bool {
        match self.last_peak_ms {
            Some(peak) => now_ms.saturating_sub(peak) >= self.config.min_rep_interval_ms,
            None => true,
        }
    }

    fn monotonic(&mut self, now_ms: u64) -> u64 {
        let now_ms = match self.last_tick_ms {
            Some(prev) if now_ms < prev => {
                log::warn!("Timestamp went backwards ({}ms < {}ms), holding", now_ms, prev);
                prev
            }
            _ => now_ms,
        };
        self.last_tick_ms = Some(now_ms);
        now_ms
    }

    /// Back to `Neutral`; debounce history is kept
    pub fn reset_phase(&mut self) {
        self.phase = MotionPhase::Neutral;
    }

    pub fn set_threshold(&mut self, threshold_deg: f64) -> EngineResult<()> {
        let candidate = DetectorConfig {
            threshold_deg,
            ..self.config
        };
        candidate.validate()?;
        self.config = candidate;
        Ok(())
    }

    pub fn phase(&self) -> MotionPhase {
        self.phase
    }

    pub fn last_peak_ms(&self) -> Option<u64> {
        self.last_peak_ms
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DetectorConfig {
        DetectorConfig {
            threshold_deg: 30.0,
            hysteresis_deg: 6.0,
            min_rep_interval_ms: 400,
            first_rep: FirstRepDebounce::FromSessionStart,
        }
    }

    fn completed(events: &[Option<PhaseTransition>]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, Some(PhaseTransition::Completed { .. })))
            .count()
    }

    #[test]
    fn test_concrete_scenario() {
        let mut det = RepDetector::new(config(), 0).unwrap();

        assert_eq!(det.update(0.0, 0), None);
        assert_eq!(det.update(35.0, 500), Some(PhaseTransition::EnteredBent));
        assert_eq!(
            det.update(4.0, 900),
            Some(PhaseTransition::Completed { at_ms: 900 })
        );
        assert_eq!(det.phase(), MotionPhase::Neutral);
        assert_eq!(det.last_peak_ms(), Some(900));

        assert_eq!(det.update(32.0, 1000), Some(PhaseTransition::EnteredBent));
        // 1150 - 900 = 250 < 400
        assert_eq!(det.update(3.0, 1150), None);
        assert_eq!(det.phase(), MotionPhase::Bent);
        assert_eq!(
            det.update(3.0, 1400),
            Some(PhaseTransition::Completed { at_ms: 1400 })
        );
    }

    #[test]
    fn test_chatter_in_dead_zone() {
        let mut det = RepDetector::new(config(), 0).unwrap();
        det.update(40.0, 100);
        let events: Vec<_> = (0..50)
            .map(|i| {
                let angle = if i % 2 == 0 { 7.0 } else { 29.9 };
                det.update(angle, 200 + i * 10)
            })
            .collect();
        assert!(events.iter().all(|e| e.is_none()));
        assert_eq!(det.phase(), MotionPhase::Bent);
    }

    #[test]
    fn test_neutral_dead_zone_does_not_enter_bent() {
        let mut det = RepDetector::new(config(), 0).unwrap();
        for i in 0..20 {
            assert_eq!(det.update(29.0 - (i % 3) as f64, i * 16), None);
        }
        assert_eq!(det.phase(), MotionPhase::Neutral);
    }

    #[test]
    fn test_negative_bend_counts() {
        let mut det = RepDetector::new(config(), 0).unwrap();
        assert_eq!(det.update(-31.0, 500), Some(PhaseTransition::EnteredBent));
        assert!(matches!(
            det.update(-2.0, 1000),
            Some(PhaseTransition::Completed { .. })
        ));
    }

    #[test]
    fn test_boundaries_inclusive() {
        let mut det = RepDetector::new(config(), 0).unwrap();
        assert_eq!(det.update(30.0, 500), Some(PhaseTransition::EnteredBent));
        assert!(det.update(6.0, 900).is_some());
    }

    #[test]
    fn test_debounce_suppresses_fast_cycles() {
        let mut det = RepDetector::new(config(), 0).unwrap();
        let mut events = vec![det.update(40.0, 500), det.update(0.0, 1000)];
        // Two quick bend-and-return cycles inside 400ms of the counted rep
        events.push(det.update(40.0, 1050));
        events.push(det.update(0.0, 1100));
        events.push(det.update(40.0, 1150));
        events.push(det.update(0.0, 1200));
        assert_eq!(completed(&events), 1);
        // Still bent: the return is pending until the interval passes
        assert_eq!(det.phase(), MotionPhase::Bent);
        assert!(det.update(0.0, 1400).is_some());
    }

    #[test]
    fn test_first_rep_from_session_start() {
        let mut det = RepDetector::new(config(), 1000).unwrap();
        det.update(40.0, 1100);
        assert_eq!(det.update(0.0, 1300), None);
        assert!(det.update(0.0, 1400).is_some());
    }

    #[test]
    fn test_first_rep_exempt() {
        let cfg = DetectorConfig {
            first_rep: FirstRepDebounce::Exempt,
            ..config()
        };
        let mut det = RepDetector::new(cfg, 1000).unwrap();
        det.update(40.0, 1100);
        assert!(det.update(0.0, 1150).is_some());
        // Later reps are still debounced
        det.update(40.0, 1200);
        assert_eq!(det.update(0.0, 1300), None);
    }

    #[test]
    fn test_backwards_time_is_held() {
        let mut det = RepDetector::new(config(), 0).unwrap();
        det.update(40.0, 1000);
        det.update(0.0, 1500);
        det.update(40.0, 1600);
        // Regressed clock is held at 1600; 1600 - 1500 < 400
        assert_eq!(det.update(0.0, 200), None);
        assert_eq!(det.phase(), MotionPhase::Bent);
    }

    #[test]
    fn test_rejects_hysteresis_at_or_above_threshold() {
        let cfg = DetectorConfig {
            hysteresis_deg: 30.0,
            ..config()
        };
        assert!(matches!(
            RepDetector::new(cfg, 0),
            Err(RepTrackerError::InvalidConfiguration(_))
        ));

        let mut det = RepDetector::new(config(), 0).unwrap();
        assert!(det.set_threshold(5.0).is_err());
        assert_eq!(det.config().threshold_deg, 30.0);
        det.set_threshold(45.0).unwrap();
        assert_eq!(det.update(40.0, 10), None);
    }

    #[test]
    fn test_reset_phase_keeps_last_peak() {
        let mut det = RepDetector::new(config(), 0).unwrap();
        det.update(40.0, 500);
        det.update(0.0, 900);
        det.update(40.0, 1000);
        det.reset_phase();
        assert_eq!(det.phase(), MotionPhase::Neutral);
        assert_eq!(det.last_peak_ms(), Some(900));
    }
}
