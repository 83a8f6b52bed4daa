//! Resampler element - sample rate conversion with rubato
//!
//! Input is gathered into fixed-size planar chunks and fed to a
//! [`SincFixedIn`] resampler; converted frames are staged in an output FIFO
//! and handed downstream as they are demanded. The filter delay is trimmed
//! at the start and the tail is flushed with zero padding at end-of-stream,
//! so a stream of `n` input frames yields exactly `ceil(n * out / in)`
//! output frames.
//!
//! Channel count and sample type are preserved; integer streams are
//! converted through `f32` internally.

use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::{Element, ElementBase, ElementError, ElementResult, PrepareContext, ProcessContext, Status};
use crate::types::{Buffer, Format};

/// Input frames per resampler chunk
const CHUNK_FRAMES: usize = 512;

/// Upper bound of zero-padded chunks pushed at end-of-stream
const FLUSH_CHUNKS: usize = 4;

fn sinc_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris,
    }
}

pub struct Resampler {
    base: ElementBase,
    target_rate: u32,
    input_format: Format,
    output_format: Format,
    inner: Option<SincFixedIn<f32>>,
    /// Planar staging for the chunk being filled
    chunk: Vec<Vec<f32>>,
    filled: usize,
    /// Planar output of one rubato call
    planes: Vec<Vec<f32>>,
    fifo: Buffer,
    /// Leading output frames still to trim (filter delay)
    skip: usize,
    frames_in: u64,
    frames_out: u64,
    max_frames: usize,
    flushed: bool,
}

impl Resampler {
    pub fn new(id: impl Into<String>, name: impl Into<String>, target_rate: u32) -> Self {
        Self {
            base: ElementBase::new(id, name).with_input("in").with_output("out"),
            target_rate,
            input_format: Format::default(),
            output_format: Format::default(),
            inner: None,
            chunk: Vec::new(),
            filled: 0,
            planes: Vec::new(),
            fifo: Buffer::with_capacity(Format::default(), 0),
            skip: 0,
            frames_in: 0,
            frames_out: 0,
            max_frames: 0,
            flushed: false,
        }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    fn ratio(&self) -> f64 {
        self.output_format.sample_rate as f64 / self.input_format.sample_rate as f64
    }

    fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Fewest output frames one full chunk is guaranteed to yield
    fn min_chunk_output(&self) -> usize {
        ((CHUNK_FRAMES as f64 * self.ratio()).floor() as usize)
            .saturating_sub(1)
            .max(1)
    }

    /// Input frames that cover `out_frames` output frames
    fn input_for(&self, out_frames: usize) -> usize {
        out_frames.div_ceil(self.min_chunk_output()) * CHUNK_FRAMES
    }

    fn max_chunk_output(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |r| r.output_frames_max())
    }

    /// Run one full chunk through rubato and stage what it produced
    fn run_chunk(&mut self) -> ElementResult<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(());
        };
        let (_, written) = inner
            .process_into_buffer(&self.chunk[..], &mut self.planes[..], None)
            .map_err(|e| ElementError::Resampler(e.to_string()))?;
        self.filled = 0;

        let skip = self.skip.min(written);
        self.skip -= skip;
        let mut count = written - skip;
        if self.flushed {
            let expected = self.expected_output();
            count = count.min(expected.saturating_sub(self.frames_out) as usize);
        }
        let appended = self.fifo.append_planar_f32(&self.planes, skip, count);
        self.frames_out += appended as u64;
        Ok(())
    }

    /// Total output for the input seen so far
    fn expected_output(&self) -> u64 {
        let out = self.output_format.sample_rate as u64;
        let inp = self.input_format.sample_rate.max(1) as u64;
        (self.frames_in * out).div_ceil(inp)
    }

    /// Push the partial chunk plus zero padding until the tail is out
    fn flush(&mut self) -> ElementResult<()> {
        self.flushed = true;
        for _ in 0..FLUSH_CHUNKS {
            if self.frames_out >= self.expected_output() {
                break;
            }
            for plane in &mut self.chunk {
                plane[self.filled..].fill(0.0);
            }
            self.run_chunk()?;
        }
        Ok(())
    }
}

impl Element for Resampler {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Resampler"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let input = ctx.input(&self.base, 0)?;
        if self.target_rate == 0 {
            return Err(ElementError::invalid_argument(
                self.name(),
                "sample_rate",
                "must be positive",
            ));
        }
        self.input_format = input;
        self.output_format = input.with_sample_rate(self.target_rate);
        self.filled = 0;
        self.frames_in = 0;
        self.frames_out = 0;
        self.flushed = false;

        self.inner = if input.sample_rate == self.target_rate {
            None
        } else {
            let channels = input.channel_count as usize;
            let resampler = SincFixedIn::<f32>::new(
                self.ratio(),
                1.1,
                sinc_params(),
                CHUNK_FRAMES,
                channels,
            )
            .map_err(|e| ElementError::Resampler(e.to_string()))?;
            self.skip = resampler.output_delay();
            self.chunk = vec![vec![0.0; CHUNK_FRAMES]; channels];
            self.planes = resampler.output_buffer_allocate(true);
            Some(resampler)
        };
        log::debug!(
            "Resampler '{}': {} -> {}Hz{}",
            self.name(),
            input,
            self.target_rate,
            if self.is_passthrough() { " (passthrough)" } else { "" }
        );

        self.max_frames = 0;
        self.reserve(ctx.max_frames());
        Ok(vec![self.output_format])
    }

    fn reserve(&mut self, max_frames: usize) {
        if max_frames <= self.max_frames && self.fifo.format() == self.output_format {
            return;
        }
        self.max_frames = max_frames;
        let chunks = self.input_for(max_frames) / CHUNK_FRAMES;
        let capacity = max_frames + (chunks + FLUSH_CHUNKS) * self.max_chunk_output();
        self.fifo = Buffer::with_capacity(self.output_format, capacity);
    }

    fn input_demand(&self, _port: usize, frames: usize) -> usize {
        if self.is_passthrough() {
            return frames;
        }
        if self.flushed {
            return 0;
        }
        let needed = frames.saturating_sub(self.fifo.frame_count());
        if needed == 0 {
            return 0;
        }
        self.input_for(needed).saturating_sub(self.filled)
    }

    fn max_input_frames(&self, _port: usize, max_frames: usize) -> usize {
        if self.is_passthrough() {
            max_frames
        } else {
            self.input_for(max_frames)
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let frames = ctx.frames();
        let input = ctx.input(0);

        if self.is_passthrough() {
            ctx.output(0).copy_from(input.buffer);
            return Ok(if input.ended { Status::Done } else { Status::More });
        }

        let available = input.frames();
        let mut offset = 0;
        while offset < available {
            let take = (CHUNK_FRAMES - self.filled).min(available - offset);
            for (ch, plane) in self.chunk.iter_mut().enumerate() {
                input
                    .buffer
                    .read_channel_f32(ch, offset, &mut plane[self.filled..self.filled + take]);
            }
            self.filled += take;
            self.frames_in += take as u64;
            offset += take;
            if self.filled == CHUNK_FRAMES {
                self.run_chunk()?;
            }
        }

        if input.ended && !self.flushed {
            self.flush()?;
        }

        let n = self.fifo.frame_count().min(frames);
        let out = ctx.output(0);
        out.clear();
        out.copy_frames(0, &self.fifo, 0, n);
        self.fifo.discard_front(n);

        Ok(if self.flushed && self.fifo.is_empty() {
            Status::Done
        } else {
            Status::More
        })
    }

    fn shutdown(&mut self) {
        self.inner = None;
    }

    fn describe(&self) -> String {
        format!(
            "Resampler '{}' {} -> {}Hz",
            self.name(),
            self.input_format.sample_rate,
            self.target_rate
        )
    }
}
