//! CPAL stream construction - bridges device callbacks to the blocking,
//! one-block-at-a-time pull/push model the Fan-Out Engine's worker loop
//! expects, via an `rtrb` ring buffer per direction.
//!
//! Real-time callback rule: no allocation, no locking, in `build_input_stream`
//! / `build_output_stream` closures.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig as CpalStreamConfig};
use crossbeam_channel::Sender;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::config::BLOCK_FRAMES;
use crate::error::{EngineError, EngineResult};
use crate::message::Event;

/// Ring buffer capacity, in samples, relative to one block - gives the
/// worker thread's polling loop margin against scheduling jitter without
/// growing end-to-end latency by more than a block or two.
const RING_BLOCKS: usize = 4;

pub struct CaptureHandle {
    pub stream: Stream,
    pub consumer: Consumer<i16>,
}

pub struct PlaybackHandle {
    pub stream: Stream,
    pub producer: Producer<i16>,
}

/// Open `device` for capture at `sample_rate`/`channels`, feeding a fresh
/// ring buffer from its input callback.
///
/// Overflow is tolerated by design (§4.1's negotiation algorithm treats
/// overflow as "available data, never raise"): samples that don't fit are
/// simply dropped rather than causing a callback-thread panic or block.
pub fn open_capture(
    device: &Device,
    sample_rate: u32,
    channels: u16,
) -> EngineResult<CaptureHandle> {
    let endpoint = device_name(device);
    let config = CpalStreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let ring_size = BLOCK_FRAMES * channels as usize * RING_BLOCKS;
    let (mut producer, consumer) = RingBuffer::<i16>::new(ring_size);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    // Ring buffer full: drop the sample rather than block or panic.
                    let _ = producer.push(sample);
                }
            },
            move |_err| {
                // Capture stream errors surface to the caller via the worker's
                // own read-error handling, not from this callback.
            },
            None,
        )
        .map_err(|e| EngineError::DeviceOpenError {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;

    stream.play().map_err(|e| EngineError::DeviceOpenError {
        endpoint,
        reason: e.to_string(),
    })?;

    Ok(CaptureHandle { stream, consumer })
}

/// Open `device` for playback at `sample_rate`/`channels`, draining a fresh
/// ring buffer into its output callback. Underrun fills the device buffer
/// with silence and reports `Event::BufferUnderrun` for `endpoint_index`.
pub fn open_playback(
    device: &Device,
    sample_rate: u32,
    channels: u16,
    endpoint_index: usize,
    event_sender: Sender<Event>,
) -> EngineResult<PlaybackHandle> {
    let endpoint = device_name(device);
    let config = CpalStreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let ring_size = BLOCK_FRAMES * channels as usize * RING_BLOCKS;
    let (producer, mut consumer) = RingBuffer::<i16>::new(ring_size);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mut underran = false;
                for slot in data.iter_mut() {
                    *slot = match consumer.pop() {
                        Ok(sample) => sample,
                        Err(_) => {
                            underran = true;
                            0
                        }
                    };
                }
                if underran {
                    let _ = event_sender.try_send(Event::BufferUnderrun { endpoint_index });
                }
            },
            move |_err| {},
            None,
        )
        .map_err(|e| EngineError::DeviceOpenError {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;

    stream.play().map_err(|e| EngineError::DeviceOpenError {
        endpoint,
        reason: e.to_string(),
    })?;

    Ok(PlaybackHandle { stream, producer })
}

/// Whether `device` reports support for `sample_rate` at `channels` for
/// output, in an explicit sample format `cpal` can actually hand us `i16` for.
pub fn supports_output_config(device: &Device, sample_rate: u32, channels: u16) -> bool {
    let Ok(configs) = device.supported_output_configs() else {
        return false;
    };
    configs.into_iter().any(|c| {
        c.channels() == channels
            && c.sample_format() == SampleFormat::I16
            && c.min_sample_rate().0 <= sample_rate
            && c.max_sample_rate().0 >= sample_rate
    })
}

pub fn supports_input_config(device: &Device, sample_rate: u32, channels: u16) -> bool {
    let Ok(configs) = device.supported_input_configs() else {
        return false;
    };
    configs.into_iter().any(|c| {
        c.channels() == channels
            && c.sample_format() == SampleFormat::I16
            && c.min_sample_rate().0 <= sample_rate
            && c.max_sample_rate().0 >= sample_rate
    })
}

fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "<unknown>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_open_default_output_capture_and_playback() {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let Some(device) = host.default_output_device() else {
            return;
        };
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let handle = open_playback(&device, 44_100, 2, 0, sender);
        assert!(handle.is_ok());
    }
}
