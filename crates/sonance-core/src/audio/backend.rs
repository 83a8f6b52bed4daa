//! Device backend trait
//!
//! A device owns the clock. Once opened it invokes the render callback
//! whenever it needs more audio. The buffer it passes is in the stream
//! format, silenced, with its frame count set to the frames wanted; the
//! callback overwrites those frames and must never block.
//!
//! Backends:
//! - [`CpalDevice`](super::CpalDevice): native output through CPAL (feature `cpal-backend`)
//! - [`RingDevice`](super::RingDevice): periods pushed into an rtrb ring, read by any consumer
//! - [`ManualDevice`](super::ManualDevice): the host pulls each period explicitly

use super::error::{AudioError, AudioResult};
use crate::types::{Buffer, Format};

/// Called by a device for each period it needs
pub type RenderCallback = Box<dyn FnMut(&mut Buffer) + Send>;

/// What a device negotiated when it was opened
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub format: Format,
    /// Frames per callback
    pub period_frames: usize,
}

impl DeviceInfo {
    /// One-way output latency of a single period
    pub fn latency_ms(&self) -> f32 {
        (self.period_frames as f32 / self.format.sample_rate.max(1) as f32) * 1000.0
    }
}

/// An output device
pub trait AudioDevice {
    fn name(&self) -> &str;

    /// Start calling `render` for every period of `period_frames` frames
    fn open(&mut self, format: Format, period_frames: usize, render: RenderCallback) -> AudioResult<DeviceInfo>;

    /// Stop the callbacks; after return `render` is never called again
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Reject formats and periods no backend can serve
pub(crate) fn validate(format: Format, period_frames: usize) -> AudioResult<()> {
    if !format.is_valid() {
        return Err(AudioError::UnsupportedFormat(format));
    }
    if period_frames == 0 || period_frames > super::MAX_BUFFER_SIZE {
        return Err(AudioError::UnsupportedPeriod(period_frames));
    }
    Ok(())
}

/// Route the outcome of a device call
///
/// Failures are logged; with `checked-calls` they abort immediately.
pub(crate) fn checked<T>(what: &str, result: AudioResult<T>) -> AudioResult<T> {
    if let Err(e) = &result {
        if cfg!(feature = "checked-calls") {
            panic!("{} failed: {}", what, e);
        }
        log::error!("{} failed: {}", what, e);
    }
    result
}
