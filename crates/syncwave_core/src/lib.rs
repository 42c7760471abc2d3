//! SyncWave Core - Device Registry, Fan-Out Engine, Calibration Engine
//!
//! This crate orchestrates the real-time audio path:
//! - Device enumeration and stream management (via CPAL)
//! - The Fan-Out Engine's capture -> gain -> delay -> sink pipeline
//! - The Calibration Engine's probe/record/cross-correlate latency estimation
//! - Channel-based communication between the caller and the audio thread
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Caller's Thread                         │
//! │  (CLI/host)  ──commands──▶ FanOutEngine ◀──events── (CLI)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ crossbeam-channel
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Worker Thread                          │
//! │   Capture ──rtrb──▶ Gain ──▶ Delay ──rtrb──▶ Sink × N        │
//! │     │                                           │            │
//! │     └───────────────────▶ broadcast tap ────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod calibration;
mod config;
mod device;
mod engine;
mod error;
mod message;
mod stream;

pub use calibration::{CalibrationOutcome, Calibrator, LOW_CONFIDENCE_THRESHOLD};
pub use config::{EngineConfig, SinkConfig, BLOCK_FRAMES, FALLBACK_SAMPLE_RATE};
pub use device::{DeviceRegistry, EndpointDescriptor};
pub use engine::FanOutEngine;
pub use error::{EngineError, EngineResult};
pub use message::{Command, Event};

// Re-export the crates this one is built on top of, matching the pattern
// set by syncwave_net re-exporting syncwave_dsp's wire-relevant types.
pub use syncwave_dsp::{DelayLine, GainStage, PcmFrame};
pub use syncwave_net::{BroadcastTap, ClientConfig, ServerConfig, StreamClient, StreamServer};
