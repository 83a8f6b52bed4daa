//! Channel topology and format conversion elements
//!
//! - [`Splitter`]: one input copied to N outputs
//! - [`StereoSplitter`]: stereo input split into two mono outputs
//! - [`StereoJoiner`]: two mono inputs joined into one stereo output
//! - [`StereoMaker`]: mono input placed on the left, right or both channels
//! - [`Converter`]: sample type conversion (the only place bit depth changes)
//! - [`Null`]: sink that discards its input

use serde::{Deserialize, Serialize};

use super::{Element, ElementBase, ElementResult, PrepareContext, ProcessContext, Status};
use crate::types::{Format, SampleType};

fn status_of(ended: bool) -> Status {
    if ended {
        Status::Done
    } else {
        Status::More
    }
}

/// Copies its input to every output port
pub struct Splitter {
    base: ElementBase,
}

impl Splitter {
    pub fn new(id: impl Into<String>, name: impl Into<String>, num_outputs: usize) -> Self {
        Self {
            base: ElementBase::new(id, name)
                .with_input("in")
                .with_outputs("out", num_outputs.max(1)),
        }
    }
}

impl Element for Splitter {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Splitter"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let format = ctx.input(&self.base, 0)?;
        Ok(vec![format; self.base.outputs().len()])
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let input = ctx.input(0);
        for out in ctx.outputs() {
            out.copy_from(input.buffer);
        }
        Ok(status_of(input.ended))
    }
}

/// Splits a stereo stream into `left` and `right` mono streams
pub struct StereoSplitter {
    base: ElementBase,
}

impl StereoSplitter {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            base: ElementBase::new(id, name)
                .with_input("in")
                .with_output("left")
                .with_output("right"),
        }
    }
}

impl Element for StereoSplitter {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "StereoSplitter"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let format = ctx.input(&self.base, 0)?;
        if format.channel_count != 2 {
            return Err(self.base.mismatch("stereo input", format));
        }
        let mono = format.with_channels(1);
        Ok(vec![mono, mono])
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let input = ctx.input(0);
        let frames = input.frames();
        for (channel, out) in ctx.outputs().iter_mut().enumerate() {
            out.clear();
            out.copy_channel(0, input.buffer, channel, frames);
        }
        Ok(status_of(input.ended))
    }
}

/// Joins `left` and `right` mono streams into one stereo stream
pub struct StereoJoiner {
    base: ElementBase,
}

impl StereoJoiner {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            base: ElementBase::new(id, name)
                .with_input("left")
                .with_input("right")
                .with_output("out"),
        }
    }
}

impl Element for StereoJoiner {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "StereoJoiner"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let format = self.base.common_input_format(ctx)?;
        if format.channel_count != 1 {
            return Err(self.base.mismatch("mono inputs", format));
        }
        Ok(vec![format.with_channels(2)])
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let left = ctx.input(0);
        let right = ctx.input(1);
        let frames = left.frames().max(right.frames());
        let out = ctx.output(0);
        out.silence(frames);
        out.copy_channel(0, left.buffer, 0, left.frames());
        out.copy_channel(1, right.buffer, 0, right.frames());
        Ok(status_of(left.ended && right.ended))
    }
}

/// Which output channel a [`StereoMaker`] writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MakerChannel {
    Left,
    Right,
    #[default]
    Both,
}

impl MakerChannel {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Left" | "left" => Some(MakerChannel::Left),
            "Right" | "right" => Some(MakerChannel::Right),
            "Both" | "both" => Some(MakerChannel::Both),
            _ => None,
        }
    }
}

/// Turns a mono stream into a stereo stream
pub struct StereoMaker {
    base: ElementBase,
    channel: MakerChannel,
}

impl StereoMaker {
    pub fn new(id: impl Into<String>, name: impl Into<String>, channel: MakerChannel) -> Self {
        Self {
            base: ElementBase::new(id, name).with_input("in").with_output("out"),
            channel,
        }
    }
}

impl Element for StereoMaker {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "StereoMaker"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let format = ctx.input(&self.base, 0)?;
        if format.channel_count != 1 {
            return Err(self.base.mismatch("mono input", format));
        }
        Ok(vec![format.with_channels(2)])
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let input = ctx.input(0);
        let frames = input.frames();
        let out = ctx.output(0);
        out.silence(frames);
        if self.channel != MakerChannel::Right {
            out.copy_channel(0, input.buffer, 0, frames);
        }
        if self.channel != MakerChannel::Left {
            out.copy_channel(1, input.buffer, 0, frames);
        }
        Ok(status_of(input.ended))
    }

    fn describe(&self) -> String {
        format!("StereoMaker '{}' {:?}", self.name(), self.channel)
    }
}

/// Converts the sample type, keeping rate and channels
pub struct Converter {
    base: ElementBase,
    sample_type: SampleType,
}

impl Converter {
    pub fn new(id: impl Into<String>, name: impl Into<String>, sample_type: SampleType) -> Self {
        Self {
            base: ElementBase::new(id, name).with_input("in").with_output("out"),
            sample_type,
        }
    }
}

impl Element for Converter {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Converter"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let format = ctx.input(&self.base, 0)?;
        Ok(vec![format.with_sample_type(self.sample_type)])
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let input = ctx.input(0);
        ctx.output(0).convert_from(input.buffer);
        Ok(status_of(input.ended))
    }
}

/// Discards its input
pub struct Null {
    base: ElementBase,
}

impl Null {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            base: ElementBase::new(id, name).with_input("in"),
        }
    }
}

impl Element for Null {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Null"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        ctx.input(&self.base, 0)?;
        Ok(Vec::new())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        Ok(status_of(ctx.input(0).ended))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testing;
    use crate::types::Buffer;

    fn stereo() -> Format {
        Format::new(SampleType::Int16, 44100, 2)
    }

    #[test]
    fn test_stereo_split_and_join() {
        let input = Buffer::from_samples(stereo(), &[1i16, -1, 2, -2, 3, -3]);

        let mut splitter = StereoSplitter::new("s", "split");
        let mut halves = testing::prepare(&mut splitter, &[stereo()], 8);
        testing::run(&mut splitter, &[(&input, false)], &mut halves, 3);
        assert_eq!(halves[0].samples::<i16>().unwrap(), &[1, 2, 3]);
        assert_eq!(halves[1].samples::<i16>().unwrap(), &[-1, -2, -3]);

        let mono = stereo().with_channels(1);
        let mut joiner = StereoJoiner::new("j", "join");
        let mut out = testing::prepare(&mut joiner, &[mono, mono], 8);
        let status = testing::run(&mut joiner, &[(&halves[0], true), (&halves[1], true)], &mut out, 3);
        assert_eq!(status, Status::Done);
        assert_eq!(out[0], input);
    }

    #[test]
    fn test_stereo_maker_left_only() {
        let mono = stereo().with_channels(1);
        let mut maker = StereoMaker::new("m", "maker", MakerChannel::Left);
        let mut out = testing::prepare(&mut maker, &[mono], 8);
        let input = Buffer::from_samples(mono, &[5i16, 6]);
        testing::run(&mut maker, &[(&input, false)], &mut out, 2);
        assert_eq!(out[0].samples::<i16>().unwrap(), &[5, 0, 6, 0]);
    }

    #[test]
    fn test_splitter_copies_to_all_outputs() {
        let mut splitter = Splitter::new("s", "split", 3);
        let mut outs = testing::prepare(&mut splitter, &[stereo()], 8);
        let input = Buffer::from_samples(stereo(), &[9i16, 9]);
        testing::run(&mut splitter, &[(&input, false)], &mut outs, 1);
        assert_eq!(outs.len(), 3);
        assert!(outs.iter().all(|b| *b == input));
    }

    #[test]
    fn test_mono_required_for_maker() {
        let mut maker = StereoMaker::new("m", "maker", MakerChannel::Both);
        let formats = [Format::default()];
        let ctx = PrepareContext::new(&formats, 64, &crate::loader::NoResources);
        assert!(matches!(
            maker.prepare(&ctx),
            Err(crate::element::ElementError::FormatMismatch { .. })
        ));
    }
}
