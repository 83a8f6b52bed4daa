//! Player configuration
//!
//! Everything a [`Player`](crate::engine::Player) needs to decide before it
//! opens its device. Defaults follow the crate features: the queue backing
//! follows `lock-free-queue`, the threading model follows `player-thread`.

use serde::{Deserialize, Serialize};

use crate::audio::{OutputConfig, DEFAULT_BUFFER_SIZE, DEFAULT_RING_PERIODS};
use crate::engine::{QueueKind, Threading, COMMAND_QUEUE_CAPACITY, DEFAULT_MAX_TRACKS, EVENT_QUEUE_CAPACITY};
use crate::loader::IoStrategy;
use crate::types::Format;

/// Player configuration
///
/// Missing keys in a config file fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Stream format of the mix; every track is adapted or checked against it
    pub format: Format,

    /// Frames per device period and per engine render
    /// Default: 1024
    pub period_frames: usize,

    /// Commands that may wait for the audio side
    pub command_capacity: usize,

    /// Events that may wait for the caller; newer events are dropped when full
    pub event_capacity: usize,

    /// Backing of both message queues
    pub queue: QueueKind,

    /// Where the engine renders
    pub threading: Threading,

    /// How file sources read their resources
    pub io_strategy: IoStrategy,

    /// Tracks mixed at once; further plays fail with an error event
    pub max_tracks: usize,

    /// Periods buffered between a playback thread and the device
    pub ring_periods: usize,

    /// Interval of the background teardown thread in milliseconds
    pub reclaim_interval_ms: u64,

    /// Native output device selection
    pub output: OutputConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            format: Format::default(),
            period_frames: DEFAULT_BUFFER_SIZE as usize,
            command_capacity: COMMAND_QUEUE_CAPACITY,
            event_capacity: EVENT_QUEUE_CAPACITY,
            queue: QueueKind::default(),
            threading: Threading::default(),
            io_strategy: IoStrategy::default(),
            max_tracks: DEFAULT_MAX_TRACKS,
            ring_periods: DEFAULT_RING_PERIODS,
            reclaim_interval_ms: 100,
            output: OutputConfig::default(),
        }
    }
}

impl PlayerConfig {
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_period_frames(mut self, frames: usize) -> Self {
        self.period_frames = frames;
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_queue(mut self, queue: QueueKind) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_threading(mut self, threading: Threading) -> Self {
        self.threading = threading;
        self
    }

    pub fn with_io_strategy(mut self, io_strategy: IoStrategy) -> Self {
        self.io_strategy = io_strategy;
        self
    }

    pub fn with_max_tracks(mut self, max_tracks: usize) -> Self {
        self.max_tracks = max_tracks;
        self
    }

    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = output;
        self
    }

    /// Latency of one period in milliseconds
    pub fn period_ms(&self) -> f32 {
        self.period_frames as f32 * 1000.0 / self.format.sample_rate.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleType;

    #[test]
    fn test_defaults_follow_features() {
        let config = PlayerConfig::default();
        assert_eq!(config.period_frames, DEFAULT_BUFFER_SIZE as usize);
        assert_eq!(config.queue == QueueKind::LockFree, cfg!(feature = "lock-free-queue"));
        assert_eq!(config.threading == Threading::Dedicated, cfg!(feature = "player-thread"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "period_frames: 256\nthreading: HostPumped\nformat:\n  sample_type: Float32\n  sample_rate: 48000\n  channel_count: 2\n";
        let config: PlayerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.period_frames, 256);
        assert_eq!(config.threading, Threading::HostPumped);
        assert_eq!(config.format, Format::new(SampleType::Float32, 48000, 2));
        assert_eq!(config.max_tracks, DEFAULT_MAX_TRACKS);
        assert!((config.period_ms() - 5.333).abs() < 0.01);
    }
}
