//! Device Registry - endpoint enumeration
//!
//! Stateless: callers may re-query at any time. Wraps `cpal`'s host API into
//! the stable `(index, name, channels, default_rate, is_loopback)` view the
//! rest of the core depends on.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Name substrings that hint an endpoint is a loopback capture source, used
/// only as a fallback display hint when the host API reports no explicit
/// loopback flag of its own (cpal does not expose one, so on this host this
/// fallback is the sole source of truth - see `SPEC_FULL.md`'s open question
/// on `is_loopback` semantics).
const LOOPBACK_NAME_HINTS: [&str; 3] = ["Loopback", "WASAPI", "Stereo Mix"];

/// Immutable snapshot of one capture or playback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Opaque handle valid for the lifetime of the registry snapshot it came
    /// from - i.e. until the next `enumerate_*` call, since cpal device
    /// ordering is not guaranteed stable across host re-enumeration.
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: u32,
    pub is_loopback: bool,
}

pub struct DeviceRegistry;

impl DeviceRegistry {
    /// Enumerate every input endpoint the host reports.
    pub fn enumerate_inputs() -> EngineResult<Vec<EndpointDescriptor>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| EngineError::DeviceEnumerationError(e.to_string()))?;

        let mut endpoints = Vec::new();
        for (index, device) in devices.enumerate() {
            if let Some(descriptor) = Self::describe_input(index, &device) {
                endpoints.push(descriptor);
            }
        }
        Ok(endpoints)
    }

    /// Enumerate every output endpoint the host reports.
    pub fn enumerate_outputs() -> EngineResult<Vec<EndpointDescriptor>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| EngineError::DeviceEnumerationError(e.to_string()))?;

        let mut endpoints = Vec::new();
        for (index, device) in devices.enumerate() {
            if let Some(descriptor) = Self::describe_output(index, &device) {
                endpoints.push(descriptor);
            }
        }
        Ok(endpoints)
    }

    /// The endpoint the host currently reports as its default loopback-style
    /// input, if the platform exposes one. cpal has no portable notion of
    /// "default loopback" distinct from "default input device", so this
    /// currently resolves to the default input and relies on
    /// [`EndpointDescriptor::is_loopback`] to tell the caller whether that
    /// guess was a loopback endpoint at all.
    pub fn default_loopback_input() -> EngineResult<Option<EndpointDescriptor>> {
        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            return Ok(None);
        };
        Ok(Self::describe_input(0, &device))
    }

    fn describe_input(index: usize, device: &cpal::Device) -> Option<EndpointDescriptor> {
        let name = device.name().ok()?;
        let configs: Vec<_> = device.supported_input_configs().ok()?.collect();
        let max_input_channels = configs.iter().map(|c| c.channels()).max().unwrap_or(0);
        let default_sample_rate = Self::pick_default_rate(&configs);

        Some(EndpointDescriptor {
            index,
            is_loopback: Self::looks_like_loopback(&name),
            name,
            max_input_channels,
            max_output_channels: 0,
            default_sample_rate,
        })
    }

    fn describe_output(index: usize, device: &cpal::Device) -> Option<EndpointDescriptor> {
        let name = device.name().ok()?;
        let configs: Vec<_> = device.supported_output_configs().ok()?.collect();
        let max_output_channels = configs.iter().map(|c| c.channels()).max().unwrap_or(0);
        let default_sample_rate = Self::pick_default_rate(&configs);

        Some(EndpointDescriptor {
            index,
            is_loopback: Self::looks_like_loopback(&name),
            name,
            max_input_channels: 0,
            max_output_channels,
            default_sample_rate,
        })
    }

    fn pick_default_rate(
        configs: &[cpal::SupportedStreamConfigRange],
    ) -> u32 {
        configs
            .iter()
            .map(|c| c.max_sample_rate().0)
            .max()
            .unwrap_or(crate::config::FALLBACK_SAMPLE_RATE)
    }

    fn looks_like_loopback(name: &str) -> bool {
        LOOPBACK_NAME_HINTS
            .iter()
            .any(|hint| name.to_lowercase().contains(&hint.to_lowercase()))
    }
}
