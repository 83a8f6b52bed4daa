//! Fade effect - linear gain ramps in or out

use serde::{Deserialize, Serialize};

use super::{
    Element, ElementBase, ElementNotice, ElementParam, ElementResult, PrepareContext, ProcessContext,
    Status,
};
use crate::types::Format;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FadeDirection {
    /// Ramp from 0.0 to 1.0
    In,
    /// Ramp from 1.0 to 0.0
    Out,
}

impl FadeDirection {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "FadeIn" | "In" | "in" => Some(FadeDirection::In),
            "FadeOut" | "Out" | "out" => Some(FadeDirection::Out),
            _ => None,
        }
    }
}

/// Applies a fade that starts `start_ms` into the stream
///
/// Before the ramp a fade-in is silent and a fade-out is at unity; after it
/// a fade-in stays at unity and a fade-out stays silent.
pub struct Fade {
    base: ElementBase,
    direction: FadeDirection,
    start_ms: u32,
    duration_ms: u32,
    start: u64,
    length: u64,
    position: u64,
    sample_rate: u32,
    /// The current ramp has completed and was reported
    reported: bool,
    notice: Option<ElementNotice>,
}

impl Fade {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        direction: FadeDirection,
        start_ms: u32,
        duration_ms: u32,
    ) -> Self {
        Self {
            base: ElementBase::new(id, name).with_input("in").with_output("out"),
            direction,
            start_ms,
            duration_ms,
            start: 0,
            length: 0,
            position: 0,
            sample_rate: 0,
            reported: false,
            notice: None,
        }
    }

    /// Gain at absolute stream frame `frame`
    fn gain_at(&self, frame: u64) -> f32 {
        let t = if frame < self.start {
            0.0
        } else if self.length == 0 || frame >= self.start + self.length {
            1.0
        } else {
            (frame - self.start) as f32 / self.length as f32
        };
        match self.direction {
            FadeDirection::In => t,
            FadeDirection::Out => 1.0 - t,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.start + self.length
    }
}

impl Element for Fade {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Effect"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let format = ctx.input(&self.base, 0)?;
        self.sample_rate = format.sample_rate;
        self.start = format.frames_for_millis(self.start_ms) as u64;
        self.length = format.frames_for_millis(self.duration_ms) as u64;
        self.position = 0;
        self.reported = false;
        self.notice = None;
        Ok(vec![format])
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let input = ctx.input(0);
        let out = ctx.output(0);
        out.copy_from(input.buffer);
        let base = self.position;
        out.map_frames(|frame, _, v| v * self.gain_at(base + frame as u64));
        self.position += input.frames() as u64;
        // a zero-length ramp is a level, not a fade
        if !self.reported && self.length > 0 && self.is_finished() {
            self.reported = true;
            self.notice = Some(ElementNotice::FadeDone(self.direction));
        }
        Ok(if input.ended { Status::Done } else { Status::More })
    }

    fn set_param(&mut self, param: ElementParam) -> ElementResult<()> {
        match param {
            ElementParam::Fade {
                direction,
                duration_ms,
            } => {
                self.direction = direction;
                self.start = self.position;
                self.length = (self.sample_rate as u64 * duration_ms as u64).div_ceil(1000);
                self.reported = false;
                Ok(())
            }
            other => Err(self.base.unsupported(&other)),
        }
    }

    fn take_notice(&mut self) -> Option<ElementNotice> {
        self.notice.take()
    }

    fn describe(&self) -> String {
        format!(
            "Effect '{}' {:?} {}ms+{}ms",
            self.name(),
            self.direction,
            self.start_ms,
            self.duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testing;
    use crate::types::{Buffer, SampleType};

    fn ones(format: Format, n: usize) -> Buffer {
        Buffer::from_samples(format, &vec![1.0f32; n])
    }

    #[test]
    fn test_fade_in_ramps_linearly() {
        let format = Format::new(SampleType::Float32, 1000, 1);
        let mut fade = Fade::new("f", "fade", FadeDirection::In, 2, 4);
        let mut out = testing::prepare(&mut fade, &[format], 16);
        testing::run(&mut fade, &[(&ones(format, 8), false)], &mut out, 8);
        let got = out[0].to_f32_vec();
        assert_eq!(got, vec![0.0, 0.0, 0.0, 0.25, 0.5, 0.75, 1.0, 1.0]);
        assert!(fade.is_finished());
    }

    #[test]
    fn test_fade_out_restart_from_param() {
        let format = Format::new(SampleType::Float32, 1000, 1);
        let mut fade = Fade::new("f", "fade", FadeDirection::In, 0, 0);
        let mut out = testing::prepare(&mut fade, &[format], 16);
        testing::run(&mut fade, &[(&ones(format, 4), false)], &mut out, 4);
        assert_eq!(out[0].to_f32_vec(), vec![1.0; 4]);

        fade.set_param(ElementParam::Fade {
            direction: FadeDirection::Out,
            duration_ms: 2,
        })
        .unwrap();
        testing::run(&mut fade, &[(&ones(format, 4), false)], &mut out, 4);
        assert_eq!(out[0].to_f32_vec(), vec![1.0, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_fade_reports_completion_once() {
        let format = Format::new(SampleType::Float32, 1000, 1);
        let mut fade = Fade::new("f", "fade", FadeDirection::In, 0, 6);
        let mut out = testing::prepare(&mut fade, &[format], 16);
        testing::run(&mut fade, &[(&ones(format, 4), false)], &mut out, 4);
        assert_eq!(fade.take_notice(), None);
        testing::run(&mut fade, &[(&ones(format, 4), false)], &mut out, 4);
        assert_eq!(fade.take_notice(), Some(ElementNotice::FadeDone(FadeDirection::In)));
        testing::run(&mut fade, &[(&ones(format, 4), false)], &mut out, 4);
        assert_eq!(fade.take_notice(), None);

        // a restarted ramp reports again
        fade.set_param(ElementParam::Fade {
            direction: FadeDirection::Out,
            duration_ms: 2,
        })
        .unwrap();
        testing::run(&mut fade, &[(&ones(format, 4), false)], &mut out, 4);
        assert_eq!(fade.take_notice(), Some(ElementNotice::FadeDone(FadeDirection::Out)));
    }
}
