//! Output device configuration
//!
//! Device selection and buffer preferences for the native backend. The
//! stream format itself comes from the player configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest period a device will be asked to render in one callback
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Default period when no preference is specified (frames)
/// 1024 frames @ 44.1kHz = ~23ms
pub const DEFAULT_BUFFER_SIZE: u32 = 1024;

/// Preferred buffer size for the device stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Use the player's period
    #[default]
    Default,
    /// Request a specific buffer size in frames (may be adjusted by the system)
    Fixed(u32),
}

impl BufferSize {
    /// Frames to request from the device for a player `period`
    pub fn resolve(&self, period: usize) -> u32 {
        match self {
            BufferSize::Default => period as u32,
            BufferSize::Fixed(frames) => (*frames).clamp(16, MAX_BUFFER_SIZE as u32),
        }
    }

    /// Calculate latency in milliseconds for a given sample rate
    pub fn latency_ms(frames: u32, sample_rate: u32) -> f32 {
        (frames as f32 / sample_rate.max(1) as f32) * 1000.0
    }
}

/// Output device selector: a device name, optionally pinned to one host API
///
/// Written as `name` or `host/name` (e.g. `ALSA/hw:0`); without a host the
/// first device of that name on any host is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Parse the `host/name` form; device names themselves may contain `/`
    /// only when a host is given
    pub fn parse(text: &str) -> Self {
        match text.split_once('/') {
            Some((host, name)) if !host.is_empty() && !name.is_empty() => Self::new(name).on_host(host),
            _ => Self::new(text),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}/{}", host, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Configuration for the native output backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output device (None = use system default)
    #[serde(default)]
    pub device: Option<DeviceId>,

    /// Preferred buffer size
    #[serde(default)]
    pub buffer_size: BufferSize,
}

impl OutputConfig {
    /// Set the output device
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Set a fixed buffer size in frames
    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_size = BufferSize::Fixed(frames);
        self
    }
}
