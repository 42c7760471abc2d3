//! Gain Stage - per-sink scalar multiply with saturation
//!
//! The gain percent is stored atomically so a caller on another thread can
//! retune a sink's volume without locking the real-time fan-out worker.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{DspError, DspResult};

/// A per-sink linear gain, expressed as an integer percent in `0..=100`.
///
/// `100` is unity: samples pass through bit-for-bit unchanged, matching
/// the invariant that gain never amplifies above the source level.
pub struct GainStage {
    percent: AtomicU32,
}

impl GainStage {
    pub fn new(percent: u32) -> DspResult<Self> {
        if percent > 100 {
            return Err(DspError::InvalidGain(percent));
        }
        Ok(Self {
            percent: AtomicU32::new(percent),
        })
    }

    pub fn percent(&self) -> u32 {
        self.percent.load(Ordering::Relaxed)
    }

    pub fn set_percent(&self, percent: u32) -> DspResult<()> {
        if percent > 100 {
            return Err(DspError::InvalidGain(percent));
        }
        self.percent.store(percent, Ordering::Relaxed);
        Ok(())
    }

    /// Apply gain to a block of interleaved samples in place.
    ///
    /// At unity gain this is a no-op pass-through; otherwise each sample is
    /// scaled by `percent / 100` with a saturating cast back to `i16`.
    #[inline]
    pub fn apply(&self, samples: &mut [i16]) {
        let percent = self.percent();
        if percent == 100 {
            return;
        }
        for sample in samples.iter_mut() {
            let scaled = (*sample as i64 * percent as i64) / 100;
            *sample = scaled.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_gain_passthrough() {
        let gain = GainStage::new(100).unwrap();
        let mut samples = vec![10_000, -10_000, 1, -1];
        let original = samples.clone();
        gain.apply(&mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn test_half_gain() {
        let gain = GainStage::new(50).unwrap();
        let mut samples = vec![10_000, -10_000];
        gain.apply(&mut samples);
        assert_eq!(samples, vec![5_000, -5_000]);
    }

    #[test]
    fn test_zero_gain() {
        let gain = GainStage::new(0).unwrap();
        let mut samples = vec![10_000, -32_768];
        gain.apply(&mut samples);
        assert_eq!(samples, vec![0, 0]);
    }

    #[test]
    fn test_invalid_gain_rejected() {
        assert!(GainStage::new(101).is_err());
    }

    #[test]
    fn test_set_percent_updates_apply() {
        let gain = GainStage::new(100).unwrap();
        gain.set_percent(25).unwrap();
        let mut samples = vec![4_000];
        gain.apply(&mut samples);
        assert_eq!(samples, vec![1_000]);
    }
}
