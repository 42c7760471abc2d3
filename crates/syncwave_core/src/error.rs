//! Engine Error Types

use thiserror::Error;

/// Errors that can occur in the Device Registry, Fan-Out Engine, and
/// Calibration Engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to enumerate audio devices: {0}")]
    DeviceEnumerationError(String),

    #[error("failed to open endpoint '{endpoint}': {reason}")]
    DeviceOpenError { endpoint: String, reason: String },

    #[error("every configured sink failed to open; at least one usable sink is required")]
    NoUsableSinks,

    #[error("engine already running")]
    AlreadyRunning,

    #[error("engine not running")]
    NotRunning,

    #[error("calibration failed: {0}")]
    CalibrationFailure(String),

    #[error("channel send error - receiver dropped")]
    ChannelSendError,

    #[error("DSP error: {0}")]
    Dsp(#[from] syncwave_dsp::DspError),

    #[error("streaming plane error: {0}")]
    Net(#[from] syncwave_net::NetError),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
