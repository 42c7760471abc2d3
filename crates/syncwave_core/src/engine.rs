//! Fan-Out Engine - Main Entry Point
//!
//! The `FanOutEngine` owns the worker thread that captures one input
//! endpoint and writes it, independently gained and delayed, to every
//! configured sink. The caller's thread only ever talks to it through
//! [`Command`]/[`Event`] channels - nothing audio-related crosses threads
//! except those messages and the `cpal` callbacks' own ring buffers.
//!
//! # Architecture
//!
//! ```text
//! capture device --[cpal callback]--> rtrb ring --[worker thread]-+--> gain -> delay -> rtrb ring --[cpal callback]--> sink 0
//!                                                                  +--> gain -> delay -> rtrb ring --[cpal callback]--> sink 1
//!                                                                  +--> broadcast tap (Streaming Plane)
//! ```
//!
//! State machine: `Idle -> Starting -> Running -> Stopping -> Idle`. A
//! fatal capture error collapses straight from `Running` to `Idle`; a
//! per-block per-sink write failure stays in `Running` and is reported as
//! a non-fatal [`Event::BufferUnderrun`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::HostTrait;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use syncwave_dsp::{DelayLine, GainStage, PcmFrame};
use syncwave_net::BroadcastTap;

use crate::config::{EngineConfig, SinkConfig};
use crate::device::DeviceRegistry;
use crate::error::{EngineError, EngineResult};
use crate::message::{Command, Event};
use crate::stream::{self, CaptureHandle, PlaybackHandle};

/// How long the worker sleeps between polls while waiting for either more
/// captured samples or a command, so it neither busy-spins nor starves
/// the command channel.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// The Fan-Out Engine controller. Lives on the caller's thread.
pub struct FanOutEngine {
    command_sender: Sender<Command>,
    event_receiver: Receiver<Event>,
    worker_thread: Option<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
    is_running: Arc<AtomicBool>,
    config: EngineConfig,
}

impl FanOutEngine {
    pub fn new() -> EngineResult<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> EngineResult<Self> {
        Self::build(config, None)
    }

    /// Construct an engine that also pushes every captured block onto the
    /// Streaming Plane via `tap`. `tap` is borrowed capability only - the
    /// engine never owns the server (see `syncwave_net::broadcast`).
    pub fn with_broadcast_tap(
        config: EngineConfig,
        tap: Arc<dyn BroadcastTap>,
    ) -> EngineResult<Self> {
        Self::build(config, Some(tap))
    }

    fn build(config: EngineConfig, tap: Option<Arc<dyn BroadcastTap>>) -> EngineResult<Self> {
        let (command_sender, command_receiver) = bounded::<Command>(32);
        let (event_sender, event_receiver) = unbounded::<Event>();

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let is_running = Arc::new(AtomicBool::new(false));

        let shutdown_clone = Arc::clone(&shutdown_flag);
        let running_clone = Arc::clone(&is_running);
        let config_clone = config.clone();

        let worker_thread = thread::Builder::new()
            .name("syncwave-worker".into())
            .spawn(move || {
                worker_main(
                    command_receiver,
                    event_sender,
                    shutdown_clone,
                    running_clone,
                    config_clone,
                    tap,
                );
            })
            .map_err(|e| EngineError::DeviceOpenError {
                endpoint: "worker thread".into(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            command_sender,
            event_receiver,
            worker_thread: Some(worker_thread),
            shutdown_flag,
            is_running,
            config,
        })
    }

    /// Start fanning `capture_index` out to `sinks`. Returns once the
    /// command is enqueued - the resulting `Started`/`Error` event arrives
    /// asynchronously on [`Self::poll_event`]/[`Self::wait_event`].
    pub fn start(
        &self,
        capture_index: usize,
        sinks: Vec<SinkConfig>,
        use_loopback: bool,
    ) -> EngineResult<()> {
        self.send_command(Command::Start {
            capture_index,
            sinks,
            use_loopback,
        })
    }

    pub fn stop(&self) -> EngineResult<()> {
        self.send_command(Command::Stop)
    }

    pub fn set_sink_gain(&self, endpoint_index: usize, gain: u32) -> EngineResult<()> {
        self.send_command(Command::SetSinkGain {
            endpoint_index,
            gain,
        })
    }

    pub fn request_state(&self) -> EngineResult<()> {
        self.send_command(Command::RequestState)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn poll_event(&self) -> Option<Event> {
        self.event_receiver.try_recv().ok()
    }

    pub fn wait_event(&self) -> Option<Event> {
        self.event_receiver.recv().ok()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn send_command(&self, command: Command) -> EngineResult<()> {
        self.command_sender
            .send(command)
            .map_err(|_| EngineError::ChannelSendError)
    }
}

impl Drop for FanOutEngine {
    fn drop(&mut self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        let _ = self.command_sender.send(Command::Shutdown);
        if let Some(handle) = self.worker_thread.take() {
            let _ = handle.join();
        }
    }
}

/// One sink's live runtime state once its playback stream is open.
struct SinkRuntime {
    endpoint_index: usize,
    gain: GainStage,
    delay: DelayLine,
    playback: PlaybackHandle,
}

fn worker_main(
    command_receiver: Receiver<Command>,
    event_sender: Sender<Event>,
    shutdown_flag: Arc<AtomicBool>,
    is_running: Arc<AtomicBool>,
    config: EngineConfig,
    tap: Option<Arc<dyn BroadcastTap>>,
) {
    info!("fan-out worker thread started");

    while !shutdown_flag.load(Ordering::SeqCst) {
        match command_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(Command::Start {
                capture_index,
                sinks,
                use_loopback,
            }) => {
                let sinks = SinkConfig::dedup_by_endpoint(sinks);
                match run_session(
                    capture_index,
                    sinks,
                    use_loopback,
                    &config,
                    &command_receiver,
                    &event_sender,
                    &shutdown_flag,
                    &is_running,
                    tap.as_deref(),
                ) {
                    Ok(()) => debug!("session ended cleanly"),
                    Err(e) => {
                        error!(error = %e, "fan-out session failed");
                        let _ = event_sender.send(Event::error(e));
                    }
                }
                is_running.store(false, Ordering::SeqCst);
            }
            Ok(Command::Stop) => {
                warn!("stop received with no session running");
                let _ = event_sender.send(Event::error(EngineError::NotRunning));
            }
            Ok(Command::SetSinkGain { .. }) => {
                warn!("set-sink-gain received with no session running");
                let _ = event_sender.send(Event::error(EngineError::NotRunning));
            }
            Ok(Command::RequestState) => {
                let _ = event_sender.send(Event::StateUpdate {
                    is_running: false,
                    sample_rate: 0,
                    channels: 0,
                    active_sinks: Vec::new(),
                });
            }
            Ok(Command::Shutdown) => {
                debug!("shutdown received");
                break;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("fan-out worker thread exiting");
}

/// Runs one `Starting -> Running -> Stopping` session to completion:
/// negotiates the capture endpoint and every sink (§4.1), then drives the
/// fixed-block steady-state loop until `Stop`/`Shutdown`/a fatal capture
/// error ends it.
#[allow(clippy::too_many_arguments)]
fn run_session(
    capture_index: usize,
    sinks: Vec<SinkConfig>,
    use_loopback: bool,
    config: &EngineConfig,
    command_receiver: &Receiver<Command>,
    event_sender: &Sender<Event>,
    shutdown_flag: &Arc<AtomicBool>,
    is_running: &Arc<AtomicBool>,
    tap: Option<&dyn BroadcastTap>,
) -> EngineResult<()> {
    let host = cpal::default_host();

    let capture_device = resolve_capture_device(&host, capture_index, use_loopback)?;
    let (sample_rate, channels) =
        negotiate_capture_format(&capture_device, config.fallback_sample_rate)?;

    let mut capture = stream::open_capture(&capture_device, sample_rate, channels)?;

    let output_devices: Vec<_> = host
        .output_devices()
        .map_err(|e| EngineError::DeviceEnumerationError(e.to_string()))?
        .collect();

    let mut runtimes = Vec::new();
    for sink in &sinks {
        let Some(device) = output_devices.get(sink.endpoint_index) else {
            warn!(endpoint_index = sink.endpoint_index, "sink endpoint not found, dropping");
            continue;
        };
        match open_sink(
            device,
            sink,
            sample_rate,
            channels,
            config.fallback_sample_rate,
            config.block_frames,
            event_sender.clone(),
        ) {
            Ok(runtime) => runtimes.push(runtime),
            Err(e) => warn!(endpoint_index = sink.endpoint_index, error = %e, "failed to open sink, dropping"),
        }
    }

    if runtimes.is_empty() {
        return Err(EngineError::NoUsableSinks);
    }

    let active_sinks: Vec<usize> = runtimes.iter().map(|r| r.endpoint_index).collect();
    is_running.store(true, Ordering::SeqCst);
    let _ = event_sender.send(Event::Started {
        active_sinks: active_sinks.clone(),
    });
    info!(?active_sinks, sample_rate, channels, "fan-out session running");

    let block_samples = config.block_frames * channels as usize;

    loop {
        match command_receiver.try_recv() {
            Ok(Command::Stop) | Ok(Command::Shutdown) => {
                info!("stopping fan-out session");
                break;
            }
            Ok(Command::SetSinkGain {
                endpoint_index,
                gain,
            }) => {
                if let Some(runtime) = runtimes
                    .iter()
                    .find(|r| r.endpoint_index == endpoint_index)
                {
                    if let Err(e) = runtime.gain.set_percent(gain) {
                        warn!(endpoint_index, error = %e, "rejected gain update");
                    }
                }
            }
            Ok(Command::RequestState) => {
                let _ = event_sender.send(Event::StateUpdate {
                    is_running: true,
                    sample_rate,
                    channels,
                    active_sinks: active_sinks.clone(),
                });
            }
            Ok(Command::Start { .. }) => {
                warn!("start received while already running, rejected");
                let _ = event_sender.send(Event::error(EngineError::AlreadyRunning));
            }
            Err(crossbeam_channel::TryRecvError::Empty) => {}
            Err(crossbeam_channel::TryRecvError::Disconnected) => break,
        }

        if shutdown_flag.load(Ordering::SeqCst) {
            break;
        }

        let Some(block) = read_capture_block(&mut capture, block_samples, shutdown_flag) else {
            break;
        };

        if let Some(tap) = tap {
            if tap.is_running() {
                tap.broadcast(&PcmFrame::new(block.clone(), channels, sample_rate));
            }
        }

        for runtime in runtimes.iter_mut() {
            let mut per_sink = block.clone();
            runtime.gain.apply(&mut per_sink);
            let delayed = runtime.delay.push_pop_block(&per_sink);

            let mut underran = false;
            for sample in delayed {
                if runtime.playback.producer.push(sample).is_err() {
                    underran = true;
                }
            }
            if underran {
                let _ = event_sender.send(Event::BufferUnderrun {
                    endpoint_index: runtime.endpoint_index,
                });
            }
        }
    }

    let _ = event_sender.send(Event::Stopped);
    Ok(())
}

fn resolve_capture_device(
    host: &cpal::Host,
    capture_index: usize,
    use_loopback: bool,
) -> EngineResult<cpal::Device> {
    if use_loopback {
        if let Some(descriptor) = DeviceRegistry::default_loopback_input()? {
            if descriptor.is_loopback {
                let devices: Vec<_> = host
                    .input_devices()
                    .map_err(|e| EngineError::DeviceEnumerationError(e.to_string()))?
                    .collect();
                if let Some(device) = devices.into_iter().nth(descriptor.index) {
                    return Ok(device);
                }
            }
        }
        warn!("no loopback input available, falling back to capture_index");
    }

    let devices: Vec<_> = host
        .input_devices()
        .map_err(|e| EngineError::DeviceEnumerationError(e.to_string()))?
        .collect();

    devices
        .into_iter()
        .nth(capture_index)
        .ok_or_else(|| EngineError::DeviceOpenError {
            endpoint: format!("input #{capture_index}"),
            reason: "no such input endpoint".into(),
        })
}

/// Negotiate a usable `(sample_rate, channels)` pair for `device`: try its
/// own reported default first, then [`EngineConfig::fallback_sample_rate`]
/// at the same channel count.
fn negotiate_capture_format(
    device: &cpal::Device,
    fallback_sample_rate: u32,
) -> EngineResult<(u32, u16)> {
    use cpal::traits::DeviceTrait;

    let default_config = device.default_input_config().map_err(|e| EngineError::DeviceOpenError {
        endpoint: device.name().unwrap_or_default(),
        reason: e.to_string(),
    })?;

    let channels = default_config.channels();
    let preferred_rate = default_config.sample_rate().0;

    if stream::supports_input_config(device, preferred_rate, channels) {
        return Ok((preferred_rate, channels));
    }
    if stream::supports_input_config(device, fallback_sample_rate, channels) {
        return Ok((fallback_sample_rate, channels));
    }

    Err(EngineError::DeviceOpenError {
        endpoint: device.name().unwrap_or_default(),
        reason: format!(
            "neither {preferred_rate}Hz nor fallback {fallback_sample_rate}Hz is supported at {channels} channels"
        ),
    })
}

/// Open `sink` for playback: try it at the capture's negotiated
/// `sample_rate` first; on failure, retry once at `fallback_sample_rate`
/// (§4.1 step 4); on failure, the sink is dropped by the caller.
fn open_sink(
    device: &cpal::Device,
    sink: &SinkConfig,
    sample_rate: u32,
    channels: u16,
    fallback_sample_rate: u32,
    block_frames: usize,
    event_sender: Sender<Event>,
) -> EngineResult<SinkRuntime> {
    let opened_rate = if stream::supports_output_config(device, sample_rate, channels) {
        sample_rate
    } else if stream::supports_output_config(device, fallback_sample_rate, channels) {
        warn!(
            endpoint_index = sink.endpoint_index,
            sample_rate, fallback_sample_rate, "sink does not support negotiated rate, retrying at fallback"
        );
        fallback_sample_rate
    } else {
        return Err(EngineError::DeviceOpenError {
            endpoint: format!("output #{}", sink.endpoint_index),
            reason: format!(
                "neither {sample_rate}Hz nor fallback {fallback_sample_rate}Hz is supported at {channels} channels"
            ),
        });
    };

    let playback = stream::open_playback(device, opened_rate, channels, sink.endpoint_index, event_sender)?;
    let gain = GainStage::new(sink.gain)?;
    let delay = DelayLine::new(sink.delay_ms, opened_rate, channels, block_frames)?;

    Ok(SinkRuntime {
        endpoint_index: sink.endpoint_index,
        gain,
        delay,
        playback,
    })
}

/// Pull exactly `block_samples` from `capture`, waiting for the capture
/// callback to fill the ring as needed. Returns `None` if shutdown is
/// observed before the block completes.
fn read_capture_block(
    capture: &mut CaptureHandle,
    block_samples: usize,
    shutdown_flag: &Arc<AtomicBool>,
) -> Option<Vec<i16>> {
    let mut block = Vec::with_capacity(block_samples);
    while block.len() < block_samples {
        match capture.consumer.pop() {
            Ok(sample) => block.push(sample),
            Err(_) => {
                if shutdown_flag.load(Ordering::SeqCst) {
                    return None;
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
    Some(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation() {
        let engine = FanOutEngine::new();
        assert!(engine.is_ok());
    }

    #[test]
    fn test_engine_not_running_initially() {
        let engine = FanOutEngine::new().unwrap();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_engine_config_default() {
        let engine = FanOutEngine::new().unwrap();
        assert_eq!(engine.config().block_frames, 4_096);
    }

    #[test]
    fn test_stop_with_no_session_reports_not_running() {
        let engine = FanOutEngine::new().unwrap();
        assert!(engine.stop().is_ok());
        let event = engine.wait_event();
        assert!(matches!(
            event,
            Some(Event::Error { message }) if message.contains("not running")
        ));
    }

    #[test]
    fn test_request_state_with_no_session() {
        let engine = FanOutEngine::new().unwrap();
        engine.request_state().unwrap();
        let event = engine.wait_event();
        assert!(matches!(
            event,
            Some(Event::StateUpdate {
                is_running: false,
                ..
            })
        ));
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_start_stop_round_trip() {
        let engine = FanOutEngine::new().unwrap();
        let sinks = vec![SinkConfig::new(0, 100, 0)];
        engine.start(0, sinks, false).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        engine.stop().unwrap();
    }
}
