//! SyncWave DSP - PCM values and signal processing shared by the fan-out and
//! calibration engines.
//!
//! This crate holds the pure, allocation-conscious pieces of the pipeline:
//! the PCM frame value type, per-sink gain and delay, and the tone
//! generation / cross-correlation math behind automatic latency detection.
//! Nothing in here owns a device or a socket.
//!
//! # Architecture
//!
//! The real-time path (`GainStage`, `DelayLine`) follows a strict
//! "no allocation in the fan-out worker's steady-state loop" rule wherever
//! possible; gain is updated via a single atomic so a caller can retune a
//! sink without a lock. The calibration path (`probe`, `correlate`) runs
//! offline and is not held to that constraint.

mod correlate;
mod delay;
mod error;
mod frame;
mod gain;
mod probe;

pub use correlate::{cross_correlate, estimate_delay};
pub use delay::DelayLine;
pub use error::{DspError, DspResult};
pub use frame::PcmFrame;
pub use gain::GainStage;
pub use probe::{Probe, DEFAULT_SAMPLE_RATE, DEFAULT_TONE_DURATION_S, DEFAULT_TONE_FREQUENCY_HZ};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _frame = PcmFrame::silence(4096, 2, 44_100);
        let _gain = GainStage::new(100).unwrap();
        let _delay = DelayLine::new(0, 44_100, 2, 4096).unwrap();
        let _probe = Probe::default_probe();
    }
}
