//! DSP Error Types

use thiserror::Error;

/// Errors that can occur during DSP operations
#[derive(Error, Debug)]
pub enum DspError {
    #[error("gain percent {0} out of range (0..=100)")]
    InvalidGain(u32),

    #[error("delay {0}ms out of range (0..=2000)")]
    InvalidDelay(u32),

    #[error("calibration recording was empty")]
    EmptyRecording,

    #[error("calibration peak at {lag_ms}ms is outside the plausible range 0..=5000ms")]
    ImplausibleDelay { lag_ms: f64 },
}

/// Result type alias for DSP operations
pub type DspResult<T> = Result<T, DspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::InvalidGain(150);
        assert!(err.to_string().contains("150"));

        let err = DspError::ImplausibleDelay { lag_ms: 7000.0 };
        assert!(err.to_string().contains("7000"));
    }
}
