//! Engine and Sink Configuration

use serde::{Deserialize, Serialize};

/// Fixed block size for the steady-state fan-out loop: ~93ms at 44.1kHz.
/// Large enough to absorb OS scheduling jitter on non-real-time schedulers,
/// small enough that start/stop still feels immediate.
pub const BLOCK_FRAMES: usize = 4_096;

/// Sample rate retried once as a last resort when a device rejects its own
/// reported default.
pub const FALLBACK_SAMPLE_RATE: u32 = 44_100;

/// Per-sink configuration supplied by the caller before starting the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub endpoint_index: usize,

    /// Percent, `0..=100`. `100` is unity.
    pub gain: u32,

    /// Milliseconds, `0..=2000`. Immutable for the duration of one engine run.
    pub delay_ms: u32,
}

impl SinkConfig {
    pub fn new(endpoint_index: usize, gain: u32, delay_ms: u32) -> Self {
        Self {
            endpoint_index,
            gain,
            delay_ms,
        }
    }

    /// De-duplicate a caller-supplied sink list by `endpoint_index`, keeping
    /// the first occurrence of each index.
    pub fn dedup_by_endpoint(sinks: Vec<SinkConfig>) -> Vec<SinkConfig> {
        let mut seen = std::collections::HashSet::new();
        sinks
            .into_iter()
            .filter(|s| seen.insert(s.endpoint_index))
            .collect()
    }
}

/// Overall Fan-Out Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Block size in frames for every capture read, sink write, and
    /// broadcast tap call. Fixed at [`BLOCK_FRAMES`] unless overridden for
    /// testing with a mock capture source.
    pub block_frames: usize,

    /// Fallback sample rate tried once if a device rejects its reported
    /// default.
    pub fallback_sample_rate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_frames: BLOCK_FRAMES,
            fallback_sample_rate: FALLBACK_SAMPLE_RATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.block_frames, 4_096);
        assert_eq!(config.fallback_sample_rate, 44_100);
    }

    #[test]
    fn test_sink_dedup_keeps_first() {
        let sinks = vec![
            SinkConfig::new(0, 100, 0),
            SinkConfig::new(1, 80, 50),
            SinkConfig::new(0, 50, 200),
        ];
        let deduped = SinkConfig::dedup_by_endpoint(sinks);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].gain, 100);
        assert_eq!(deduped[0].delay_ms, 0);
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.block_frames, deserialized.block_frames);
    }
}
