//! Delay element - holds back its input stream for a fixed time
//!
//! The element emits silence for the configured duration without pulling
//! its input at all, then forwards the input unchanged. The switch happens
//! at the exact frame, inside a single call if needed.

use super::{Element, ElementBase, ElementResult, PrepareContext, ProcessContext, Status};
use crate::types::Format;

pub struct Delay {
    base: ElementBase,
    delay_ms: u32,
    /// Silent frames still to emit
    remaining: usize,
}

impl Delay {
    pub fn new(id: impl Into<String>, name: impl Into<String>, delay_ms: u32) -> Self {
        Self {
            base: ElementBase::new(id, name).with_input("in").with_output("out"),
            delay_ms,
            remaining: 0,
        }
    }

    pub fn remaining_frames(&self) -> usize {
        self.remaining
    }
}

impl Element for Delay {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Delay"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let format = ctx.input(&self.base, 0)?;
        self.remaining = format.frames_for_millis(self.delay_ms);
        Ok(vec![format])
    }

    fn input_demand(&self, _port: usize, frames: usize) -> usize {
        frames.saturating_sub(self.remaining)
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let frames = ctx.frames();
        let pad = self.remaining.min(frames);
        self.remaining -= pad;

        let input = ctx.input(0);
        let out = ctx.output(0);
        out.silence(pad);
        if pad == frames {
            return Ok(Status::More);
        }
        out.copy_frames(pad, input.buffer, 0, input.frames());
        Ok(if input.ended { Status::Done } else { Status::More })
    }

    fn describe(&self) -> String {
        format!("Delay '{}' {}ms", self.name(), self.delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testing;
    use crate::types::{Buffer, SampleType};

    #[test]
    fn test_delay_pads_then_passes_through() {
        let format = Format::new(SampleType::Int16, 1000, 1);
        let mut delay = Delay::new("d", "delay", 5);
        let mut out = testing::prepare(&mut delay, &[format], 8);
        assert_eq!(delay.input_demand(0, 4), 0);

        let empty = Buffer::with_capacity(format, 8);
        testing::run(&mut delay, &[(&empty, false)], &mut out, 4);
        assert!(out[0].is_silent());
        assert_eq!(out[0].frame_count(), 4);

        // one frame of delay left, so three input frames are demanded
        assert_eq!(delay.input_demand(0, 4), 3);
        let input = Buffer::from_samples(format, &[7i16, 8, 9]);
        let status = testing::run(&mut delay, &[(&input, true)], &mut out, 4);
        assert_eq!(status, Status::Done);
        assert_eq!(out[0].samples::<i16>().unwrap(), &[0, 7, 8, 9]);
    }
}
