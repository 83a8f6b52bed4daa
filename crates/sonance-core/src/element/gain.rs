//! Gain element - simple volume control

use super::{Element, ElementBase, ElementParam, ElementResult, PrepareContext, ProcessContext, Status};
use crate::types::Format;

/// Largest accepted gain factor (+12dB)
pub const MAX_GAIN: f32 = 4.0;

/// Scales its input by a linear factor
///
/// 0.0 = silence, 1.0 = unity, 2.0 = +6dB. Integer streams saturate.
pub struct Gain {
    base: ElementBase,
    gain: f32,
}

impl Gain {
    pub fn new(id: impl Into<String>, name: impl Into<String>, gain: f32) -> Self {
        Self {
            base: ElementBase::new(id, name).with_input("in").with_output("out"),
            gain: gain.clamp(0.0, MAX_GAIN),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, MAX_GAIN);
    }
}

impl Element for Gain {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Gain"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let format = ctx.input(&self.base, 0)?;
        Ok(vec![format])
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let input = ctx.input(0);
        let out = ctx.output(0);
        out.copy_from(input.buffer);
        out.scale(self.gain);
        Ok(if input.ended { Status::Done } else { Status::More })
    }

    fn set_param(&mut self, param: ElementParam) -> ElementResult<()> {
        match param {
            ElementParam::Gain(gain) => {
                self.set_gain(gain);
                Ok(())
            }
            other => Err(self.base.unsupported(&other)),
        }
    }

    fn describe(&self) -> String {
        format!("Gain '{}' x{:.2}", self.name(), self.gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testing;
    use crate::types::{Buffer, SampleType};

    #[test]
    fn test_gain_halves_samples() {
        let format = Format::new(SampleType::Int16, 44100, 1);
        let mut gain = Gain::new("g", "gain", 0.5);
        let mut out = testing::prepare(&mut gain, &[format], 16);
        let input = Buffer::from_samples(format, &[1000i16, -1000, 4]);
        let status = testing::run(&mut gain, &[(&input, false)], &mut out, 3);
        assert_eq!(status, Status::More);
        assert_eq!(out[0].samples::<i16>().unwrap(), &[500, -500, 2]);
    }

    #[test]
    fn test_gain_forwards_end_of_stream() {
        let format = Format::new(SampleType::Float32, 44100, 2);
        let mut gain = Gain::new("g", "gain", 1.0);
        let mut out = testing::prepare(&mut gain, &[format], 16);
        let input = Buffer::from_samples(format, &[0.5f32, 0.5]);
        assert_eq!(testing::run(&mut gain, &[(&input, true)], &mut out, 4), Status::Done);
        assert_eq!(out[0].frame_count(), 1);
    }

    #[test]
    fn test_gain_param_is_clamped() {
        let mut gain = Gain::new("g", "gain", 1.0);
        gain.set_param(ElementParam::Gain(100.0)).unwrap();
        assert_eq!(gain.gain(), MAX_GAIN);
        gain.set_param(ElementParam::Gain(-1.0)).unwrap();
        assert_eq!(gain.gain(), 0.0);
    }
}
