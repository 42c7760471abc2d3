//! Message Types for Thread Communication
//!
//! Commands flow from the caller's thread -> Fan-Out Engine worker thread.
//! Events flow from the worker thread -> caller.

use serde::{Deserialize, Serialize};

use crate::config::SinkConfig;

/// Commands sent to the Fan-Out Engine's worker thread.
#[derive(Debug, Clone)]
pub enum Command {
    /// Open the capture endpoint and every sink, then enter the steady-state
    /// loop.
    Start {
        capture_index: usize,
        sinks: Vec<SinkConfig>,
        use_loopback: bool,
    },

    /// Request termination; the worker observes this at most one block later.
    Stop,

    /// Retune one sink's gain without restarting the engine (§9 "dynamic
    /// gain per block" - an atomic the worker reads each block, no lock).
    SetSinkGain { endpoint_index: usize, gain: u32 },

    /// Request a `StateUpdate` event describing the current run.
    RequestState,

    /// Shut the worker thread down entirely (distinct from `Stop`, which
    /// leaves the worker alive in `Idle` ready for another `Start`).
    Shutdown,
}

/// Events emitted by the Fan-Out Engine's worker thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// Capture and at least one sink opened; the steady-state loop is running.
    Started { active_sinks: Vec<usize> },

    /// The engine returned to `Idle`.
    Stopped,

    /// A session-fatal or configuration error; the engine does not transition
    /// to `Running` (or has left it) as a result.
    Error { message: String },

    /// A single-block write failure on one sink; logged, non-fatal, the sink
    /// stays active.
    BufferUnderrun { endpoint_index: usize },

    /// Current state snapshot, emitted in response to `Command::RequestState`.
    StateUpdate {
        is_running: bool,
        sample_rate: u32,
        channels: u16,
        active_sinks: Vec<usize>,
    },
}

impl Event {
    pub fn error<E: std::fmt::Display>(err: E) -> Self {
        Event::Error {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::BufferUnderrun { endpoint_index: 2 };
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_error_event() {
        let event = Event::error("boom");
        if let Event::Error { message } = event {
            assert_eq!(message, "boom");
        } else {
            panic!("should be Error variant");
        }
    }

    #[test]
    fn test_state_update_serialization() {
        let event = Event::StateUpdate {
            is_running: true,
            sample_rate: 44_100,
            channels: 2,
            active_sinks: vec![0, 1],
        };
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }
}
