//! Cross-correlation delay estimation
//!
//! Finds the lag that best aligns a recorded signal with the reference tone
//! that produced it, and reports how confident that alignment is.
//!
//! Deliberately stricter than the engine this was distilled from: an
//! implausible peak (outside `0..=5000` ms) is reported as a failure here
//! rather than silently coerced to a zero delay, so a bad calibration never
//! masquerades as "no delay needed".

use crate::error::{DspError, DspResult};

fn normalize_to_unit_peak(samples: &[i16]) -> Vec<f64> {
    let peak = samples
        .iter()
        .map(|&s| (s as f64).abs())
        .fold(0.0_f64, f64::max);
    if peak == 0.0 {
        return vec![0.0; samples.len()];
    }
    samples.iter().map(|&s| s as f64 / peak).collect()
}

/// Full discrete cross-correlation of `recorded` against `reference`.
///
/// Returns `(lags, correlation)` where `lags[i]` is the shift (in samples,
/// may be negative) that produced `correlation[i]`. Positive lag means the
/// recorded signal trails the reference — the physically expected case for
/// a played-then-recorded tone.
pub fn cross_correlate(recorded: &[f64], reference: &[f64]) -> (Vec<i64>, Vec<f64>) {
    let rec_len = recorded.len() as i64;
    let ref_len = reference.len() as i64;
    let lag_min = -(ref_len - 1);
    let lag_max = rec_len - 1;

    let mut lags = Vec::with_capacity((lag_max - lag_min + 1) as usize);
    let mut corr = Vec::with_capacity(lags.capacity());

    for lag in lag_min..=lag_max {
        let mut sum = 0.0;
        // r[lag] = sum_n recorded[n] * reference[n - lag]
        for n in 0..rec_len {
            let ref_idx = n - lag;
            if ref_idx >= 0 && ref_idx < ref_len {
                sum += recorded[n as usize] * reference[ref_idx as usize];
            }
        }
        lags.push(lag);
        corr.push(sum);
    }

    (lags, corr)
}

/// Estimate the delay between an emitted `tone` and its `recorded` echo.
///
/// Returns `(delay_ms, confidence)` on success. Fails if the recording is
/// empty or the best-aligning lag falls outside the plausible `0..=5000` ms
/// window.
pub fn estimate_delay(tone: &[i16], recorded: &[i16], sample_rate: u32) -> DspResult<(f64, f64)> {
    if recorded.is_empty() || tone.is_empty() {
        return Err(DspError::EmptyRecording);
    }

    let reference = normalize_to_unit_peak(tone);
    let rec_norm = normalize_to_unit_peak(recorded);

    let (lags, corr) = cross_correlate(&rec_norm, &reference);

    let (best_idx, &best_corr) = corr
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .expect("corr is non-empty because recorded/tone are non-empty");

    let lag = lags[best_idx];
    let delay_ms = (lag as f64 / sample_rate as f64) * 1000.0;
    let confidence = best_corr / (tone.len() as f64 * recorded.len() as f64);

    if !(0.0..=5000.0).contains(&delay_ms) {
        return Err(DspError::ImplausibleDelay { lag_ms: delay_ms });
    }

    Ok((delay_ms, confidence))
}
