//! Mixer element - N inputs summed into one output
//!
//! Inputs are summed sample-accurately on a float bus and saturated once
//! when the bus is written out. Each input keeps a small carry buffer so
//! that an input delivering more frames than its siblings in one pass stays
//! time-aligned: the mixer only emits the span every live input has covered
//! and keeps the rest for the next pass.
//! Inputs that have finished contribute silence. A paused input is not
//! pulled at all and contributes silence until it is released.

use super::{
    Element, ElementBase, ElementError, ElementParam, ElementResult, PrepareContext, ProcessContext,
    Status,
};
use crate::types::{Buffer, Format, SampleType};

pub struct Mixer {
    base: ElementBase,
    format: Format,
    pending: Vec<Buffer>,
    bus: Buffer,
    ended: Vec<bool>,
    paused: Vec<bool>,
    /// Samples that saturated since prepare
    clipped: u64,
}

impl Mixer {
    pub fn new(id: impl Into<String>, name: impl Into<String>, num_inputs: usize) -> Self {
        let num_inputs = num_inputs.max(1);
        Self {
            base: ElementBase::new(id, name)
                .with_inputs("in", num_inputs)
                .with_output("out"),
            format: Format::default(),
            pending: Vec::new(),
            bus: Buffer::with_capacity(Format::default().with_sample_type(SampleType::Float32), 0),
            ended: vec![false; num_inputs],
            paused: vec![false; num_inputs],
            clipped: 0,
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.base.inputs().len()
    }

    pub fn clipped_samples(&self) -> u64 {
        self.clipped
    }

    pub fn is_paused(&self, port: usize) -> bool {
        self.paused.get(port).copied().unwrap_or(false)
    }
}

impl Element for Mixer {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Mixer"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let format = self.base.common_input_format(ctx)?;
        self.format = format;
        self.ended.iter_mut().for_each(|e| *e = false);
        self.paused.iter_mut().for_each(|p| *p = false);
        self.pending.clear();
        self.reserve(ctx.max_frames());
        self.clipped = 0;
        Ok(vec![format])
    }

    fn reserve(&mut self, max_frames: usize) {
        let capacity = max_frames * 2;
        if self.pending.first().map_or(true, |b| b.capacity() < capacity) {
            self.pending = (0..self.num_inputs())
                .map(|_| Buffer::with_capacity(self.format, capacity))
                .collect();
        }
        let bus_format = self.format.with_sample_type(SampleType::Float32);
        if self.bus.format() != bus_format || self.bus.capacity() < max_frames {
            self.bus = Buffer::with_capacity(bus_format, max_frames);
        }
    }

    fn input_demand(&self, port: usize, frames: usize) -> usize {
        if self.ended[port] || self.paused[port] {
            return 0;
        }
        let carried = self.pending.get(port).map_or(0, Buffer::frame_count);
        frames.saturating_sub(carried)
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let frames = ctx.frames();

        // gather this pass' input behind whatever was carried
        for port in 0..ctx.num_inputs() {
            if self.paused[port] {
                continue;
            }
            let input = ctx.input(port);
            let pending = &mut self.pending[port];
            let at = pending.frame_count();
            pending.copy_frames(at, input.buffer, 0, input.frames());
            self.ended[port] |= input.ended;
        }

        // only emit what every live input has covered
        let (pending, paused, ended) = (&self.pending, &self.paused, &self.ended);
        let live_min = (0..pending.len())
            .filter(|&port| !paused[port] && !ended[port])
            .map(|port| pending[port].frame_count())
            .min();
        let longest = (0..pending.len())
            .filter(|&port| !paused[port])
            .map(|port| pending[port].frame_count())
            .max()
            .unwrap_or(0);
        // a held input keeps the mix running in silence
        let holding = (0..paused.len()).any(|port| paused[port] && !ended[port]);
        let n = match live_min {
            Some(min) => min,
            None if holding => frames,
            None => longest,
        }
        .min(frames);

        self.bus.silence(n);
        for (pending, paused) in self.pending.iter_mut().zip(&self.paused) {
            let take = pending.frame_count().min(n);
            if take > 0 && !paused {
                self.bus.accumulate_frames(0, pending, take, 1.0);
                pending.discard_front(take);
            }
        }
        let out = ctx.output(0);
        out.silence(n);
        self.clipped += out.store_frames(0, &self.bus, n) as u64;

        let done = self.ended.iter().all(|e| *e)
            && self
                .pending
                .iter()
                .zip(&self.paused)
                .all(|(pending, paused)| *paused || pending.is_empty());
        Ok(if done { Status::Done } else { Status::More })
    }

    fn set_param(&mut self, param: ElementParam) -> ElementResult<()> {
        match param {
            ElementParam::PauseInput { port, paused } => match self.paused.get_mut(port) {
                Some(slot) => {
                    *slot = paused;
                    Ok(())
                }
                None => Err(ElementError::UnknownPort {
                    element: self.name().to_string(),
                    port: port.to_string(),
                }),
            },
            other => Err(self.base.unsupported(&other)),
        }
    }

    fn describe(&self) -> String {
        format!("Mixer '{}' {} inputs", self.name(), self.num_inputs())
    }
}
