//! Delay Line - per-sink FIFO that holds a configured amount of latency
//!
//! Pre-filled with silence at construction so the first `delay_ms` worth of
//! real capture stays buffered behind it; everything pushed after the
//! prefill emerges exactly `delay_ms` later, measured in whole blocks.
//!
//! Capacity is rounded up to a whole number of blocks, not just a whole
//! number of frames: `push_pop_block` only ever pushes/pops one block at a
//! time, so a non-block-aligned capacity would let real audio bleed into
//! the tail of what should still be a silent block.
//!
//! A plain `VecDeque` is the right structure here, not `rtrb`: push and pop
//! both happen from the single fan-out worker thread, one block at a time,
//! so there is no producer/consumer split to exploit.

use std::collections::VecDeque;

use crate::error::{DspError, DspResult};

pub struct DelayLine {
    queue: VecDeque<i16>,
    channels: u16,
}

impl DelayLine {
    /// Build a delay line sized to hold `delay_ms` of audio at `sample_rate`,
    /// pre-filled with silence, with capacity rounded up to a whole number
    /// of `block_frames`-sized blocks.
    pub fn new(delay_ms: u32, sample_rate: u32, channels: u16, block_frames: usize) -> DspResult<Self> {
        if delay_ms > 2000 {
            return Err(DspError::InvalidDelay(delay_ms));
        }
        let capacity_samples =
            Self::capacity_samples(delay_ms, sample_rate, channels, block_frames);
        let mut queue = VecDeque::with_capacity(capacity_samples * 2);
        queue.extend(std::iter::repeat(0i16).take(capacity_samples));
        Ok(Self { queue, channels })
    }

    fn capacity_samples(delay_ms: u32, sample_rate: u32, channels: u16, block_frames: usize) -> usize {
        let raw_samples =
            ((delay_ms as u64 * sample_rate as u64 * channels as u64) + 999) / 1000;
        let block_samples = (block_frames * channels as usize).max(1) as u64;
        let blocks = (raw_samples + block_samples - 1) / block_samples;
        (blocks * block_samples) as usize
    }

    /// Number of samples currently buffered ahead of playback.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Push one block of samples, then pop and return a block of the same
    /// length from the head — the steady-state "push real audio in, let the
    /// oldest buffered audio out" operation the fan-out worker performs once
    /// per capture block.
    pub fn push_pop_block(&mut self, incoming: &[i16]) -> Vec<i16> {
        self.queue.extend(incoming.iter().copied());
        let mut out = Vec::with_capacity(incoming.len());
        for _ in 0..incoming.len() {
            out.push(self.queue.pop_front().unwrap_or(0));
        }
        out
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_delay_has_no_prefill() {
        let mut line = DelayLine::new(0, 44_100, 2, 4096).unwrap();
        assert_eq!(line.len(), 0);
        let out = line.push_pop_block(&[1, 2, 3, 4]);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_delay_capacity_rounds_up_to_whole_blocks() {
        // 100ms at 44,100Hz stereo raw-rounds to 8,820 samples, but one
        // block is 4,096 frames * 2 channels = 8,192 samples, so capacity
        // must round up to 2 whole blocks (16,384 samples), not 8,820.
        let line = DelayLine::new(100, 44_100, 2, 4096).unwrap();
        assert_eq!(line.len(), 16_384);
    }

    #[test]
    fn test_delay_emits_whole_silent_blocks_before_real_audio() {
        let mut line = DelayLine::new(100, 44_100, 2, 4096).unwrap();
        assert_eq!(line.len(), 16_384);

        let block = vec![7i16; 4096 * 2];
        let first_out = line.push_pop_block(&block);
        assert!(first_out.iter().all(|&s| s == 0));

        // Capacity is exactly 2 blocks, so the second emitted block is
        // still entirely silence - no partial bleed of real audio.
        let second_out = line.push_pop_block(&block);
        assert!(second_out.iter().all(|&s| s == 0));

        // The third block is the first one of real capture, in full.
        let third_out = line.push_pop_block(&block);
        assert!(third_out.iter().all(|&s| s == 7));
    }

    #[test]
    fn test_invalid_delay_rejected() {
        assert!(DelayLine::new(2001, 44_100, 2, 4096).is_err());
    }
}
