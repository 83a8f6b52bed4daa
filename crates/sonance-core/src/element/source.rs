//! Generator sources - silence and sine tones
//!
//! Both sources run for a fixed duration (or forever when the duration is
//! zero) and finish exactly on the last frame, so a two second tone at
//! 44.1kHz produces 88200 frames in total.

use std::f64::consts::TAU;

use super::{Element, ElementBase, ElementParam, ElementResult, PrepareContext, ProcessContext, Status};
use crate::types::Format;

/// Frames budget for a finite source
#[derive(Debug, Clone, Copy)]
struct Duration {
    total: Option<u64>,
    produced: u64,
}

impl Duration {
    fn new(format: &Format, millis: u32) -> Self {
        let total = (millis > 0).then(|| format.frames_for_millis(millis) as u64);
        Self { total, produced: 0 }
    }

    /// Frames to emit for a request of `frames`, and whether that finishes the source
    fn take(&mut self, frames: usize) -> (usize, Status) {
        match self.total {
            None => {
                self.produced += frames as u64;
                (frames, Status::More)
            }
            Some(total) => {
                let left = total.saturating_sub(self.produced);
                let n = (frames as u64).min(left) as usize;
                self.produced += n as u64;
                let status = if self.produced >= total {
                    Status::Done
                } else {
                    Status::More
                };
                (n, status)
            }
        }
    }
}

/// Source that produces silence
pub struct ZeroSource {
    base: ElementBase,
    format: Format,
    duration_ms: u32,
    duration: Duration,
}

impl ZeroSource {
    /// Create a silent source; `duration_ms == 0` runs forever
    pub fn new(id: impl Into<String>, name: impl Into<String>, format: Format, duration_ms: u32) -> Self {
        Self {
            base: ElementBase::new(id, name).with_output("out"),
            format,
            duration_ms,
            duration: Duration::new(&format, duration_ms),
        }
    }
}

impl Element for ZeroSource {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "ZeroSource"
    }

    fn prepare(&mut self, _ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        self.duration = Duration::new(&self.format, self.duration_ms);
        Ok(vec![self.format])
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let (frames, status) = self.duration.take(ctx.frames());
        ctx.output(0).silence(frames);
        Ok(status)
    }

    fn describe(&self) -> String {
        format!("ZeroSource '{}' {}", self.name(), self.format)
    }
}

/// Sine tone generator
///
/// Phase is carried across calls, so consecutive buffers join without
/// discontinuity. Every channel carries the same waveform.
pub struct SineSource {
    base: ElementBase,
    format: Format,
    frequency: f32,
    amplitude: f32,
    duration_ms: u32,
    duration: Duration,
    phase: f64,
}

impl SineSource {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        format: Format,
        frequency: f32,
        duration_ms: u32,
    ) -> Self {
        Self {
            base: ElementBase::new(id, name).with_output("out"),
            format,
            frequency,
            amplitude: 1.0,
            duration_ms,
            duration: Duration::new(&format, duration_ms),
            phase: 0.0,
        }
    }

    /// Peak amplitude in `[0.0, 1.0]`
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }
}

impl Element for SineSource {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "SineSource"
    }

    fn prepare(&mut self, _ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        self.duration = Duration::new(&self.format, self.duration_ms);
        self.phase = 0.0;
        Ok(vec![self.format])
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let (frames, status) = self.duration.take(ctx.frames());
        let step = TAU * self.frequency as f64 / self.format.sample_rate as f64;
        let start = self.phase;
        let amplitude = self.amplitude as f64;
        ctx.output(0).fill_frames(frames, |frame, _| {
            ((start + step * frame as f64).sin() * amplitude) as f32
        });
        self.phase = (start + step * frames as f64) % TAU;
        Ok(status)
    }

    fn set_param(&mut self, param: ElementParam) -> ElementResult<()> {
        match param {
            ElementParam::Frequency(hz) if hz > 0.0 => {
                self.frequency = hz;
                Ok(())
            }
            other => Err(self.base.unsupported(&other)),
        }
    }

    fn describe(&self) -> String {
        format!(
            "SineSource '{}' {}Hz {}",
            self.name(),
            self.frequency,
            self.format
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testing;
    use crate::types::SampleType;

    #[test]
    fn test_zero_source_is_silent_and_finite() {
        let format = Format::new(SampleType::Int16, 1000, 1);
        let mut zero = ZeroSource::new("z", "zero", format, 100);
        let mut out = testing::prepare(&mut zero, &[], 64);
        let (samples, calls) = testing::drain(&mut zero, &mut out, 64, 10);
        assert_eq!(samples.len(), 100);
        assert_eq!(calls, 2);
        assert!(samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_sine_finishes_on_last_frame() {
        let format = Format::stereo_i16(44100);
        let mut sine = SineSource::new("s", "sine", format, 440.0, 2000);
        let mut out = testing::prepare(&mut sine, &[], 1024);
        let (samples, calls) = testing::drain(&mut sine, &mut out, 1024, 200);
        assert_eq!(samples.len(), 88200 * 2);
        assert_eq!(calls, 88200usize.div_ceil(1024));
    }

    #[test]
    fn test_sine_phase_is_continuous() {
        let format = Format::new(SampleType::Float32, 48000, 1);
        let mut a = SineSource::new("a", "a", format, 1000.0, 0);
        let mut b = SineSource::new("b", "b", format, 1000.0, 0);
        let mut out_a = testing::prepare(&mut a, &[], 256);
        let mut out_b = testing::prepare(&mut b, &[], 256);

        testing::run(&mut a, &[], &mut out_a, 256);
        let whole = out_a[0].to_f32_vec();

        let mut pieces = Vec::new();
        for n in [100, 100, 56] {
            testing::run(&mut b, &[], &mut out_b, n);
            pieces.extend(out_b[0].to_f32_vec());
        }
        for (x, y) in whole.iter().zip(&pieces) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_frequency_param() {
        let mut sine = SineSource::new("s", "sine", Format::default(), 440.0, 0);
        sine.set_param(ElementParam::Frequency(880.0)).unwrap();
        assert_eq!(sine.frequency(), 880.0);
        assert!(sine.set_param(ElementParam::Gain(1.0)).is_err());
    }
}
