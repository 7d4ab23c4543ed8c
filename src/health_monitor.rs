use serde::{Deserialize, Serialize};

use crate::sensors::{AccelSample, OrientationSample, SignalSource};

/// Tracks freshness of a single sensor feed. `last_update_ms` is the tick
/// time a new value was first seen, never the sample's own timestamp, so
/// the host's sensor clock does not have to match the tick clock.
#[derive(Clone, Debug)]
pub struct SourceHealth {
    pub name: &'static str,
    pub last_update_ms: Option<u64>,
    pub silence_threshold_ms: u64,
}

impl SourceHealth {
    pub fn new(name: &'static str, silence_threshold_ms: u64) -> Self {
        SourceHealth {
            name,
            last_update_ms: None,
            silence_threshold_ms,
        }
    }

    pub fn update(&mut self, timestamp_ms: u64) {
        self.last_update_ms = Some(match self.last_update_ms {
            Some(prev) => prev.max(timestamp_ms),
            None => timestamp_ms,
        });
    }

    pub fn time_since_last_update(&self, now_ms: u64) -> Option<u64> {
        self.last_update_ms.map(|t| now_ms.saturating_sub(t))
    }

    /// Never-seen sources count as silent
    pub fn is_silent(&self, now_ms: u64) -> bool {
        self.time_since_last_update(now_ms)
            .map(|d| d > self.silence_threshold_ms)
            .unwrap_or(true)
    }
}

/// Report of signal health at one tick
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub orientation_healthy: bool,
    pub orientation_silence_ms: Option<u64>,
    pub accel_healthy: bool,
    pub accel_silence_ms: Option<u64>,
    pub signal_active: bool,
}

/// Derives the "signal active" flag from per-source staleness and reports
/// edges only, so the UI can show a "no signal" state without polling.
#[derive(Clone, Debug)]
pub struct SignalHealth {
    pub orientation: SourceHealth,
    pub accel: SourceHealth,
    last_orientation: Option<OrientationSample>,
    last_accel: Option<AccelSample>,
    active: bool,
}

impl SignalHealth {
    pub fn new(stale_timeout_ms: u64) -> Self {
        SignalHealth {
            orientation: SourceHealth::new("Orientation", stale_timeout_ms),
            accel: SourceHealth::new("Accel", stale_timeout_ms),
            last_orientation: None,
            last_accel: None,
            active: false,
        }
    }

    /// Look at what the slots hold at tick `now_ms`. A source only counts
    /// as updated when its slot value differs from the one seen last tick.
    pub fn observe(
        &mut self,
        now_ms: u64,
        orientation: Option<&OrientationSample>,
        accel: Option<&AccelSample>,
    ) {
        if let Some(o) = orientation {
            if self.last_orientation.as_ref() != Some(o) {
                self.orientation.update(now_ms);
                self.last_orientation = Some(*o);
            }
        }
        if let Some(a) = accel {
            if self.last_accel.as_ref() != Some(a) {
                self.accel.update(now_ms);
                self.last_accel = Some(*a);
            }
        }
    }

    pub fn is_fresh(&self, source: SignalSource, now_ms: u64) -> bool {
        match source {
            SignalSource::Orientation => !self.orientation.is_silent(now_ms),
            SignalSource::Acceleration => !self.accel.is_silent(now_ms),
            SignalSource::Unavailable => false,
        }
    }

    pub fn check_health(&self, now_ms: u64) -> HealthReport {
        let orientation_healthy = !self.orientation.is_silent(now_ms);
        let accel_healthy = !self.accel.is_silent(now_ms);
        HealthReport {
            orientation_healthy,
            orientation_silence_ms: self.orientation.time_since_last_update(now_ms),
            accel_healthy,
            accel_silence_ms: self.accel.time_since_last_update(now_ms),
            signal_active: orientation_healthy || accel_healthy,
        }
    }

    /// Returns the new flag only when it flips
    pub fn poll(&mut self, now_ms: u64) -> Option<bool> {
        let active = self.check_health(now_ms).signal_active;
        if active == self.active {
            return None;
        }
        self.active = active;
        if active {
            log::info!("Sensor signal active at {}ms", now_ms);
        } else {
            log::warn!("Sensor signal lost at {}ms", now_ms);
        }
        Some(active)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Format health status for logging
    pub fn format_status(&self, now_ms: u64) -> String {
        let report = self.check_health(now_ms);
        let describe = |healthy: bool, silence: Option<u64>| match (healthy, silence) {
            (true, _) => "ok".to_string(),
            (false, Some(ms)) => format!("silent {:.1}s", ms as f64 / 1000.0),
            (false, None) => "never seen".to_string(),
        };
        format!(
            "Signal: Orientation {} | Accel {}",
            describe(report.orientation_healthy, report.orientation_silence_ms),
            describe(report.accel_healthy, report.accel_silence_ms)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_health_detection() {
        let mut health = SourceHealth::new("test", 2000);
        assert!(health.is_silent(0));

        health.update(1000);
        assert!(!health.is_silent(1500));
        assert!(!health.is_silent(3000));
        assert!(health.is_silent(3001));

        // Out-of-order timestamps never move the clock back
        health.update(500);
        assert_eq!(health.last_update_ms, Some(1000));
    }

    #[test]
    fn test_signal_edges() {
        let mut health = SignalHealth::new(2000);
        assert_eq!(health.poll(0), None);

        let accel = AccelSample::new(0.0, 0.0, 9.8, 100);
        health.observe(100, None, Some(&accel));
        assert_eq!(health.poll(100), Some(true));
        // Same value still in the slot: not an update
        health.observe(1000, None, Some(&accel));
        assert_eq!(health.poll(1000), None);
        health.observe(2200, None, Some(&accel));
        assert_eq!(health.poll(2200), Some(false));
        assert!(!health.is_active());

        health.observe(2300, Some(&OrientationSample::new(5.0, 2300)), Some(&accel));
        assert_eq!(health.poll(2300), Some(true));
        assert!(health.is_fresh(SignalSource::Orientation, 2300));
        assert!(!health.is_fresh(SignalSource::Acceleration, 2300));
    }

    #[test]
    fn test_staleness_ignores_sensor_clock() {
        // Sensor clock far ahead of the tick clock, frozen after one reading
        let mut health = SignalHealth::new(2000);
        let frozen = OrientationSample::new(10.0, 60_000);
        let mut edges = Vec::new();
        for tick in 0..=625u64 {
            let now = tick * 16;
            health.observe(now, Some(&frozen), None);
            if let Some(active) = health.poll(now) {
                edges.push((now, active));
            }
        }
        assert_eq!(edges, vec![(0, true), (2016, false)]);

        // Sensor clock behind the tick clock, updating every tick
        let mut health = SignalHealth::new(2000);
        for tick in 0..100u64 {
            let now = 50_000 + tick * 16;
            health.observe(now, Some(&OrientationSample::new(tick as f64, tick)), None);
            health.poll(now);
        }
        assert!(health.is_active());
        assert!(health.is_fresh(SignalSource::Orientation, 50_000 + 99 * 16));
    }

    #[test]
    fn test_format_status() {
        let mut health = SignalHealth::new(2000);
        health.observe(0, Some(&OrientationSample::new(5.0, 0)), None);
        let status = health.format_status(3000);
        assert!(status.contains("silent 3.0s"));
        assert!(status.contains("never seen"));
    }
}
