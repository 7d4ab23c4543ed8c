use crossbeam::atomic::AtomicCell;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EngineResult, RepTrackerError};

/// JSON has no NaN; serde_json writes it as null, so read null back as NaN
fn nan_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Device orientation event as pushed by the host (front/back tilt only)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    #[serde(deserialize_with = "nan_if_null")]
    pub beta_deg: f64,
    pub timestamp_ms: u64,
}

impl OrientationSample {
    pub fn new(beta_deg: f64, timestamp_ms: u64) -> Self {
        Self {
            beta_deg,
            timestamp_ms,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.beta_deg.is_finite()
    }
}

/// Gravity-inclusive accelerometer event as pushed by the host
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    #[serde(deserialize_with = "nan_if_null")]
    pub x: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub y: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub z: f64,
    pub timestamp_ms: u64,
}

impl AccelSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp_ms: u64) -> Self {
        Self {
            x,
            y,
            z,
            timestamp_ms,
        }
    }

    /// Only y/z feed the tilt estimate, so x may be missing
    pub fn is_valid(&self) -> bool {
        self.y.is_finite() && self.z.is_finite()
    }

    /// Tilt from the gravity vector, assumes the device is roughly
    /// stationary between samples
    pub fn tilt_deg(&self) -> f64 {
        wrap_degrees(self.y.atan2(self.z).to_degrees())
    }
}

/// Which feed produced the angle for a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSource {
    Orientation,
    Acceleration,
    Unavailable,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Orientation => "orientation",
            SignalSource::Acceleration => "acceleration",
            SignalSource::Unavailable => "unavailable",
        }
    }
}

/// One resolved tilt estimate per tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub source: SignalSource,
    pub angle_deg: f64,
    pub timestamp_ms: u64,
}

impl SensorSample {
    pub fn unavailable(timestamp_ms: u64) -> Self {
        Self {
            source: SignalSource::Unavailable,
            angle_deg: 0.0,
            timestamp_ms,
        }
    }

    pub fn is_available(&self) -> bool {
        self.source != SignalSource::Unavailable
    }
}

/// Wrap an angle into (-180, 180]
pub fn wrap_degrees(deg: f64) -> f64 {
    let mut wrapped = deg % 360.0;
    if wrapped > 180.0 {
        wrapped -= 360.0;
    } else if wrapped <= -180.0 {
        wrapped += 360.0;
    }
    wrapped
}

/// Pick a tilt estimate from whichever feed is usable.
///
/// Orientation wins when present and finite. Acceleration is the fallback
/// for hosts without orientation events. With neither, the result is tagged
/// `Unavailable` at angle 0 and callers must not treat it as motion.
pub fn resolve_angle(
    orientation: Option<&OrientationSample>,
    accel: Option<&AccelSample>,
) -> SensorSample {
    if let Some(o) = orientation.filter(|o| o.is_valid()) {
        return SensorSample {
            source: SignalSource::Orientation,
            angle_deg: wrap_degrees(o.beta_deg),
            timestamp_ms: o.timestamp_ms,
        };
    }

    if let Some(a) = accel.filter(|a| a.is_valid()) {
        return SensorSample {
            source: SignalSource::Acceleration,
            angle_deg: a.tilt_deg(),
            timestamp_ms: a.timestamp_ms,
        };
    }

    let ts = orientation
        .map(|o| o.timestamp_ms)
        .into_iter()
        .chain(accel.map(|a| a.timestamp_ms))
        .max()
        .unwrap_or(0);
    SensorSample::unavailable(ts)
}

/// Single-slot "latest value" cache. Writers overwrite, readers always see
/// the last fully written value; nothing is queued. Samples are too wide for
/// a native atomic, so `AtomicCell` falls back to crossbeam's seqlock here.
pub struct SampleSlot<T: Copy> {
    cell: AtomicCell<Option<T>>,
}

impl<T: Copy> SampleSlot<T> {
    pub fn new() -> Self {
        Self {
            cell: AtomicCell::new(None),
        }
    }

    pub fn store(&self, value: T) {
        self.cell.store(Some(value));
    }

    pub fn latest(&self) -> Option<T> {
        self.cell.load()
    }

    pub fn clear(&self) {
        self.cell.store(None);
    }
}

impl<T: Copy> Default for SampleSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer side of the sensor plumbing. Host callbacks push into it from
/// any thread; the tick is the only reader.
#[derive(Default)]
pub struct SensorFeed {
    orientation: SampleSlot<OrientationSample>,
    accel: SampleSlot<AccelSample>,
}

impl SensorFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an orientation event; a non-finite tilt is dropped and the
    /// previous value kept
    pub fn push_orientation(&self, sample: OrientationSample) -> EngineResult<()> {
        if !sample.is_valid() {
            log::warn!("Dropping orientation sample at {}ms: non-finite beta", sample.timestamp_ms);
            return Err(RepTrackerError::InvalidSample(format!(
                "orientation beta={} at {}ms",
                sample.beta_deg, sample.timestamp_ms
            )));
        }
        self.orientation.store(sample);
        Ok(())
    }

    /// Store an accelerometer event; non-finite y/z is dropped and the
    /// previous value kept
    pub fn push_acceleration(&self, sample: AccelSample) -> EngineResult<()> {
        if !sample.is_valid() {
            log::warn!("Dropping accel sample at {}ms: non-finite y/z", sample.timestamp_ms);
            return Err(RepTrackerError::InvalidSample(format!(
                "acceleration y={} z={} at {}ms",
                sample.y, sample.z, sample.timestamp_ms
            )));
        }
        self.accel.store(sample);
        Ok(())
    }

    pub fn latest_orientation(&self) -> Option<OrientationSample> {
        self.orientation.latest()
    }

    pub fn latest_acceleration(&self) -> Option<AccelSample> {
        self.accel.latest()
    }

    pub fn clear(&self) {
        self.orientation.clear();
        self.accel.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_wrap_degrees() {
        assert_relative_eq!(wrap_degrees(0.0), 0.0);
        assert_relative_eq!(wrap_degrees(190.0), -170.0);
        assert_relative_eq!(wrap_degrees(-190.0), 170.0);
        assert_relative_eq!(wrap_degrees(180.0), 180.0);
        assert_relative_eq!(wrap_degrees(-180.0), 180.0);
        assert_relative_eq!(wrap_degrees(540.0), 180.0);
        assert_relative_eq!(wrap_degrees(725.0), 5.0);
    }

    #[test]
    fn test_orientation_preferred() {
        let o = OrientationSample::new(20.0, 100);
        let a = AccelSample::new(0.0, 1.0, 1.0, 120);
        let s = resolve_angle(Some(&o), Some(&a));
        assert_eq!(s.source, SignalSource::Orientation);
        assert_relative_eq!(s.angle_deg, 20.0);
        assert_eq!(s.timestamp_ms, 100);
    }

    #[test]
    fn test_orientation_wrapped() {
        let o = OrientationSample::new(350.0, 0);
        let s = resolve_angle(Some(&o), None);
        assert_relative_eq!(s.angle_deg, -10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_accel_fallback() {
        let a = AccelSample::new(0.0, 1.0, 1.0, 50);
        let s = resolve_angle(None, Some(&a));
        assert_eq!(s.source, SignalSource::Acceleration);
        assert_relative_eq!(s.angle_deg, 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tilt_stays_in_half_open_range() {
        // atan2(-0.0, -1.0) is exactly -180
        assert_eq!(AccelSample::new(0.0, -0.0, -1.0, 0).tilt_deg(), 180.0);
        assert_eq!(AccelSample::new(0.0, 0.0, -1.0, 0).tilt_deg(), 180.0);
        assert_relative_eq!(AccelSample::new(0.0, -1.0, 1.0, 0).tilt_deg(), -45.0);
    }

    #[test]
    fn test_nan_orientation_falls_back_to_accel() {
        let o = OrientationSample::new(f64::NAN, 10);
        let a = AccelSample::new(f64::NAN, 0.0, 9.81, 12);
        let s = resolve_angle(Some(&o), Some(&a));
        assert_eq!(s.source, SignalSource::Acceleration);
        assert_relative_eq!(s.angle_deg, 0.0);
    }

    #[test]
    fn test_unavailable() {
        let s = resolve_angle(None, None);
        assert_eq!(s.source, SignalSource::Unavailable);
        assert_eq!(s.angle_deg, 0.0);
        assert!(!s.is_available());

        let bad = AccelSample::new(0.0, f64::INFINITY, 1.0, 70);
        let s = resolve_angle(None, Some(&bad));
        assert_eq!(s.source, SignalSource::Unavailable);
        assert_eq!(s.timestamp_ms, 70);
    }

    #[test]
    fn test_feed_keeps_last_good_value() {
        let feed = SensorFeed::new();
        feed.push_orientation(OrientationSample::new(12.0, 0)).unwrap();
        let err = feed
            .push_orientation(OrientationSample::new(f64::NAN, 16))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_sample");
        assert_eq!(
            feed.latest_orientation(),
            Some(OrientationSample::new(12.0, 0))
        );

        feed.push_acceleration(AccelSample::new(f64::NAN, 1.0, 1.0, 5))
            .unwrap();
        assert!(feed
            .push_acceleration(AccelSample::new(0.0, f64::NAN, 1.0, 6))
            .is_err());
        assert_eq!(feed.latest_acceleration().map(|a| a.timestamp_ms), Some(5));
    }

    #[test]
    fn test_nan_survives_json() {
        let json = serde_json::to_string(&OrientationSample::new(f64::NAN, 3)).unwrap();
        assert!(json.contains("null"));
        let back: OrientationSample = serde_json::from_str(&json).unwrap();
        assert!(back.beta_deg.is_nan());
        assert!(!back.is_valid());
    }

    #[test]
    fn test_slot_last_value_wins() {
        let slot = SampleSlot::new();
        slot.store(1u64);
        slot.store(2u64);
        slot.store(3u64);
        assert_eq!(slot.latest(), Some(3));
        slot.clear();
        assert_eq!(slot.latest(), None);
    }
}
