//! Repetition detection from a noisy, variable-rate tilt stream.
//!
//! Sensor callbacks write into a [`sensors::SensorFeed`]; each host frame
//! calls [`engine::EngineContext::step_with_feed`] (or the pure
//! [`engine::tick`]), which resolves one tilt estimate, smooths it, subtracts
//! the calibrated neutral angle and runs the hysteresis/debounce detector.

pub mod calibration;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod health_monitor;
pub mod live_status;
pub mod sensors;
pub mod session;
pub mod smoothing;
pub mod trace;

pub use config::EngineConfig;
pub use detector::MotionPhase;
pub use engine::{tick, EngineContext, EngineEvent};
pub use error::{EngineResult, RepTrackerError};
pub use sensors::{AccelSample, OrientationSample, SensorFeed, SensorSample, SignalSource};
