use thiserror::Error;

/// Rep tracker error types
///
/// None of these are fatal: every variant describes a local condition the
/// caller can recover from on a later tick.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepTrackerError {
    #[error("No sensor signal received yet")]
    SignalUnavailable,

    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Calibration failed: {0}")]
    CalibrationFailed(String),

    #[error("Calibration already in progress")]
    CalibrationInProgress,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Trace error: {0}")]
    Trace(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, RepTrackerError>;

impl RepTrackerError {
    /// Short machine-readable tag, used in status snapshots
    pub fn kind(&self) -> &'static str {
        match self {
            RepTrackerError::SignalUnavailable => "signal_unavailable",
            RepTrackerError::InvalidSample(_) => "invalid_sample",
            RepTrackerError::CalibrationFailed(_) | RepTrackerError::CalibrationInProgress => {
                "calibration"
            }
            RepTrackerError::InvalidConfiguration(_) => "invalid_configuration",
            RepTrackerError::InvalidState(_) => "invalid_state",
            RepTrackerError::Trace(_) => "trace",
        }
    }
}
