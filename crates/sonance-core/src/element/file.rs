//! File source - incremental decoding with symphonia
//!
//! The resource is opened in `prepare` through the graph's
//! [`ResourceLoader`](crate::loader::ResourceLoader) using the configured
//! [`IoStrategy`]: preloaded bytes are decoded from memory, streamed
//! handles are read packet by packet as playback advances.
//!
//! Decoded frames are staged in a FIFO that always holds at least one frame
//! more than the pending request unless the stream is exhausted, so the
//! call that delivers the last frames is also the call that reports
//! [`Status::Done`].
//!
//! Output keeps the file's sample rate and channel count. The sample type
//! follows the codec (16-bit PCM stays `Int16`, bit-exact) unless an
//! explicit type is requested.

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::SampleFormat;

use super::{Element, ElementBase, ElementError, ElementResult, PrepareContext, ProcessContext, Status};
use crate::loader::{AudioStream, IoStrategy, ReadSeek};
use crate::types::{Buffer, Format, SampleType};

/// Streamed handle exposed to symphonia as a seekable media source
struct StreamSource(Box<dyn ReadSeek>);

impl Read for StreamSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Seek for StreamSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl MediaSource for StreamSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Interleaved staging for one decoded packet
enum StageSamples {
    Int16(SampleBuffer<i16>),
    Int32(SampleBuffer<i32>),
    Float32(SampleBuffer<f32>),
}

struct Stage {
    /// Capacity in frames
    frames: usize,
    samples: StageSamples,
}

impl Stage {
    fn new(sample_type: SampleType, frames: usize, spec: SignalSpec) -> Self {
        let duration = frames as u64;
        let samples = match sample_type {
            SampleType::Int16 => StageSamples::Int16(SampleBuffer::new(duration, spec)),
            SampleType::Int32 => StageSamples::Int32(SampleBuffer::new(duration, spec)),
            SampleType::Float32 => StageSamples::Float32(SampleBuffer::new(duration, spec)),
        };
        Self { frames, samples }
    }

    fn capacity(&self) -> usize {
        self.frames
    }

    /// Copy a decoded packet in
    fn load(&mut self, decoded: AudioBufferRef<'_>) {
        match &mut self.samples {
            StageSamples::Int16(b) => b.copy_interleaved_ref(decoded),
            StageSamples::Int32(b) => b.copy_interleaved_ref(decoded),
            StageSamples::Float32(b) => b.copy_interleaved_ref(decoded),
        }
    }

    fn append_to(&self, fifo: &mut Buffer) -> usize {
        match &self.samples {
            StageSamples::Int16(b) => fifo.append_samples(b.samples()),
            StageSamples::Int32(b) => fifo.append_samples(b.samples()),
            StageSamples::Float32(b) => fifo.append_samples(b.samples()),
        }
    }
}

/// Sample type matching what the codec produces natively
fn native_sample_type(params: &CodecParameters) -> SampleType {
    match params.sample_format {
        Some(SampleFormat::U8 | SampleFormat::S8 | SampleFormat::U16 | SampleFormat::S16) => SampleType::Int16,
        Some(SampleFormat::U24 | SampleFormat::S24 | SampleFormat::U32 | SampleFormat::S32) => SampleType::Int32,
        Some(SampleFormat::F32 | SampleFormat::F64) => SampleType::Float32,
        None => match params.bits_per_sample {
            Some(bits) if bits <= 16 => SampleType::Int16,
            Some(_) => SampleType::Int32,
            None => SampleType::Float32,
        },
    }
}

/// Open container and codec state; dropped on shutdown
struct Decoding {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    stage: Option<Stage>,
    sample_type: SampleType,
}

/// What one decode step produced
enum Step {
    /// A packet was decoded into the stage
    Frames,
    /// Nothing usable in this packet
    Skip,
    /// The container is exhausted
    End,
}

impl Decoding {
    fn next(&mut self) -> ElementResult<Step> {
        let packet = match self.reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(Step::End);
            }
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Ok(Step::Skip);
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != self.track_id {
            return Ok(Step::Skip);
        }
        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // a corrupt packet is dropped, the stream continues
            Err(SymphoniaError::DecodeError(_)) => return Ok(Step::Skip),
            Err(e) => return Err(e.into()),
        };
        if decoded.frames() == 0 {
            return Ok(Step::Skip);
        }
        let needed = decoded.capacity();
        if self.stage.as_ref().map_or(true, |s| s.capacity() < needed) {
            self.stage = Some(Stage::new(self.sample_type, needed, *decoded.spec()));
        }
        if let Some(stage) = self.stage.as_mut() {
            stage.load(decoded);
        }
        Ok(Step::Frames)
    }

    fn rewind(&mut self) -> ElementResult<()> {
        self.reader.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: 0,
                track_id: self.track_id,
            },
        )?;
        self.decoder.reset();
        Ok(())
    }
}

/// Decodes an audio resource
pub struct FileSource {
    base: ElementBase,
    path: String,
    strategy: Option<IoStrategy>,
    sample_type: Option<SampleType>,
    /// Number of passes over the file; 0 loops forever
    loops: u32,
    format: Format,
    state: Option<Decoding>,
    fifo: Buffer,
    max_frames: usize,
    passes: u32,
    exhausted: bool,
    decoded: u64,
}

impl FileSource {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base: ElementBase::new(id, name).with_output("out"),
            path: path.into(),
            strategy: None,
            sample_type: None,
            loops: 1,
            format: Format::default(),
            state: None,
            fifo: Buffer::with_capacity(Format::default(), 0),
            max_frames: 0,
            passes: 0,
            exhausted: false,
            decoded: 0,
        }
    }

    /// Read with this strategy instead of the graph's default
    pub fn with_strategy(mut self, strategy: IoStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Decode into this sample type instead of the codec's native one
    pub fn with_sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = Some(sample_type);
        self
    }

    pub fn with_loops(mut self, loops: u32) -> Self {
        self.loops = loops;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Frames decoded so far, across loops
    pub fn frames_decoded(&self) -> u64 {
        self.decoded
    }

    fn open(&self, ctx: &PrepareContext<'_>) -> ElementResult<(Decoding, CodecParameters)> {
        let strategy = self.strategy.unwrap_or(ctx.io_strategy());
        let source: Box<dyn MediaSource> = match ctx.loader().open(&self.path, strategy)? {
            AudioStream::Memory(bytes) => Box::new(Cursor::new(bytes)),
            AudioStream::Stream(handle) => Box::new(StreamSource(handle)),
        };
        let mss = MediaSourceStream::new(source, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = Path::new(&self.path).extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| ElementError::NoAudioTrack(self.path.clone()))?;
        let params = track.codec_params.clone();
        let track_id = track.id;
        let decoder = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;

        let sample_type = self.sample_type.unwrap_or_else(|| native_sample_type(&params));
        Ok((
            Decoding {
                reader,
                decoder,
                track_id,
                stage: None,
                sample_type,
            },
            params,
        ))
    }

    /// Pull the next packet into the FIFO, handling end of pass and looping
    fn decode_more(&mut self) -> ElementResult<()> {
        let step = match self.state.as_mut() {
            Some(state) => state.next()?,
            None => {
                self.exhausted = true;
                return Ok(());
            }
        };
        match step {
            Step::Frames => {
                // only grows when a packet outsizes every earlier one
                let capacity = self.fifo_capacity(self.max_frames);
                self.grow_fifo(capacity);
                if let Some(stage) = self.state.as_ref().and_then(|s| s.stage.as_ref()) {
                    self.decoded += stage.append_to(&mut self.fifo) as u64;
                }
            }
            Step::Skip => {}
            Step::End => {
                self.passes += 1;
                if self.loops == 0 || self.passes < self.loops {
                    if let Some(state) = self.state.as_mut() {
                        state.rewind()?;
                    }
                } else {
                    self.exhausted = true;
                }
            }
        }
        Ok(())
    }

    fn fifo_capacity(&self, max_frames: usize) -> usize {
        let packet = self
            .state
            .as_ref()
            .and_then(|s| s.stage.as_ref())
            .map_or(0, Stage::capacity);
        max_frames + packet.max(1) + 1
    }

    fn grow_fifo(&mut self, capacity: usize) {
        if self.fifo.format() == self.format && self.fifo.capacity() >= capacity {
            return;
        }
        let mut fifo = Buffer::with_capacity(self.format, capacity);
        fifo.copy_frames(0, &self.fifo, 0, self.fifo.frame_count());
        self.fifo = fifo;
    }
}

impl Element for FileSource {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "FileSource"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let (mut state, params) = self.open(ctx)?;
        self.passes = 0;
        self.exhausted = false;
        self.decoded = 0;

        // decode the first packet here so the staging buffer is sized before playback
        let mut primed = false;
        for _ in 0..64 {
            match state.next()? {
                Step::Frames => {
                    primed = true;
                    break;
                }
                Step::Skip => continue,
                Step::End => break,
            }
        }

        let spec_rate = params.sample_rate;
        let spec_channels = params.channels.map(|c| c.count() as u16);
        let (sample_rate, channels) = match (spec_rate, spec_channels) {
            (Some(rate), Some(channels)) => (rate, channels),
            _ => return Err(ElementError::NoAudioTrack(self.path.clone())),
        };
        self.format = Format::new(state.sample_type, sample_rate, channels);

        self.state = Some(state);
        self.fifo = Buffer::with_capacity(self.format, 0);
        self.max_frames = ctx.max_frames();
        let capacity = self.fifo_capacity(self.max_frames);
        self.grow_fifo(capacity);
        if primed {
            if let Some(stage) = self.state.as_ref().and_then(|s| s.stage.as_ref()) {
                self.decoded += stage.append_to(&mut self.fifo) as u64;
            }
        }
        log::debug!(
            "FileSource '{}': {} ({}, {:?})",
            self.name(),
            self.path,
            self.format,
            self.strategy.unwrap_or(ctx.io_strategy())
        );
        Ok(vec![self.format])
    }

    fn reserve(&mut self, max_frames: usize) {
        self.max_frames = self.max_frames.max(max_frames);
        let capacity = self.fifo_capacity(self.max_frames);
        self.grow_fifo(capacity);
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        if self.state.is_none() && !self.exhausted {
            return Err(ElementError::NotPrepared(self.name().to_string()));
        }
        let frames = ctx.frames();

        // keep one frame of lookahead so the end is seen with the last frames
        let mut idle = 0;
        while !self.exhausted && self.fifo.frame_count() <= frames && idle < 64 {
            let before = self.fifo.frame_count();
            self.decode_more()?;
            idle = if self.fifo.frame_count() == before { idle + 1 } else { 0 };
        }

        let n = self.fifo.frame_count().min(frames);
        let out = ctx.output(0);
        out.clear();
        out.copy_frames(0, &self.fifo, 0, n);
        self.fifo.discard_front(n);

        Ok(if self.exhausted && self.fifo.is_empty() {
            Status::Done
        } else {
            Status::More
        })
    }

    fn shutdown(&mut self) {
        if self.state.take().is_some() {
            log::debug!("FileSource '{}' closed {}", self.name(), self.path);
        }
    }

    fn describe(&self) -> String {
        format!(
            "FileSource '{}' {} {} decoded={}",
            self.name(),
            self.path,
            self.format,
            self.decoded
        )
    }
}
