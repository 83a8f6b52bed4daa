//! Common types for Sonance
//!
//! This module contains the fundamental PCM types every element exchanges:
//! the sample format tuple, the numeric sample conversions and the
//! pre-allocated [`Buffer`] that flows along graph links.
//!
//! # Numeric semantics
//!
//! Integer samples map to `[-1.0, 1.0]` by dividing by the positive full
//! scale. The reverse conversion rounds to nearest and saturates, so an
//! `i16 -> f32 -> i16` round trip is bit-exact and overflow clips to the
//! format range instead of wrapping.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default sample rate for the output stream (44.1kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default channel count for the output stream
pub const DEFAULT_CHANNELS: u16 = 2;

/// Sample encoding carried by a [`Buffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleType {
    /// 16-bit signed integer PCM
    #[default]
    Int16,
    /// 32-bit signed integer PCM
    Int32,
    /// 32-bit float PCM in `[-1.0, 1.0]`
    Float32,
}

impl SampleType {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleType::Int16 => 2,
            SampleType::Int32 => 4,
            SampleType::Float32 => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleType::Int16 => "Int16",
            SampleType::Int32 => "Int32",
            SampleType::Float32 => "Float32",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Int16" | "int16" | "i16" => Some(SampleType::Int16),
            "Int32" | "int32" | "i32" => Some(SampleType::Int32),
            "Float32" | "float32" | "f32" => Some(SampleType::Float32),
            _ => None,
        }
    }
}

/// The format tuple that fully describes a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Format {
    pub sample_type: SampleType,
    pub sample_rate: u32,
    pub channel_count: u16,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            sample_type: SampleType::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_count: DEFAULT_CHANNELS,
        }
    }
}

impl Format {
    pub fn new(sample_type: SampleType, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_type,
            sample_rate,
            channel_count,
        }
    }

    /// 16-bit stereo at the given rate
    pub fn stereo_i16(sample_rate: u32) -> Self {
        Self::new(SampleType::Int16, sample_rate, 2)
    }

    /// 32-bit float stereo at the given rate
    pub fn stereo_f32(sample_rate: u32) -> Self {
        Self::new(SampleType::Float32, sample_rate, 2)
    }

    pub fn with_channels(mut self, channel_count: u16) -> Self {
        self.channel_count = channel_count;
        self
    }

    pub fn with_sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.sample_type.bytes_per_sample()
    }

    /// Size of one interleaved frame in bytes
    pub fn frame_size(&self) -> usize {
        self.bytes_per_sample() * self.channel_count as usize
    }

    /// Check the tuple describes a usable stream
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channel_count > 0
    }

    /// Number of frames covering `millis` milliseconds (rounded up)
    pub fn frames_for_millis(&self, millis: u32) -> usize {
        (self.sample_rate as u64 * millis as u64).div_ceil(1000) as usize
    }

    /// Duration of `frames` frames in milliseconds
    pub fn millis_for_frames(&self, frames: u64) -> u64 {
        frames * 1000 / self.sample_rate.max(1) as u64
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}Hz {}ch",
            self.sample_type.name(),
            self.sample_rate,
            self.channel_count
        )
    }
}

/// Interleaved sample storage for one buffer
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Float32(Vec<f32>),
}

impl SampleData {
    fn zeroed(sample_type: SampleType, len: usize) -> Self {
        match sample_type {
            SampleType::Int16 => SampleData::Int16(vec![0; len]),
            SampleType::Int32 => SampleData::Int32(vec![0; len]),
            SampleType::Float32 => SampleData::Float32(vec![0.0; len]),
        }
    }

    fn len(&self) -> usize {
        match self {
            SampleData::Int16(v) => v.len(),
            SampleData::Int32(v) => v.len(),
            SampleData::Float32(v) => v.len(),
        }
    }
}

/// Numeric behaviour shared by every supported sample encoding
pub trait Sample: Copy + Default + PartialEq + Send + 'static {
    const TYPE: SampleType;

    /// Convert to normalized float
    fn to_f32(self) -> f32;

    /// Convert from normalized float, rounding to nearest and saturating
    #[inline]
    fn from_f32(value: f32) -> Self {
        Self::from_f32_clipped(value).0
    }

    /// Like [`Sample::from_f32`], also reporting whether the value saturated
    ///
    /// Integer types decide this on the rounded integer value, so full-scale
    /// negative samples such as `i16::MIN` are representable and not clipped.
    fn from_f32_clipped(value: f32) -> (Self, bool);

    fn slice(data: &SampleData) -> Option<&[Self]>;

    fn slice_mut(data: &mut SampleData) -> Option<&mut [Self]>;
}

impl Sample for i16 {
    const TYPE: SampleType = SampleType::Int16;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32 / i16::MAX as f32
    }

    #[inline]
    fn from_f32_clipped(value: f32) -> (Self, bool) {
        let scaled = (value * i16::MAX as f32).round();
        let clipped = scaled > i16::MAX as f32 || scaled < i16::MIN as f32;
        (scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16, clipped)
    }

    fn slice(data: &SampleData) -> Option<&[Self]> {
        match data {
            SampleData::Int16(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn slice_mut(data: &mut SampleData) -> Option<&mut [Self]> {
        match data {
            SampleData::Int16(v) => Some(v.as_mut_slice()),
            _ => None,
        }
    }
}

impl Sample for i32 {
    const TYPE: SampleType = SampleType::Int32;

    #[inline]
    fn to_f32(self) -> f32 {
        (self as f64 / i32::MAX as f64) as f32
    }

    #[inline]
    fn from_f32_clipped(value: f32) -> (Self, bool) {
        let scaled = (value as f64 * i32::MAX as f64).round();
        let clipped = scaled > i32::MAX as f64 || scaled < i32::MIN as f64;
        (scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32, clipped)
    }

    fn slice(data: &SampleData) -> Option<&[Self]> {
        match data {
            SampleData::Int32(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn slice_mut(data: &mut SampleData) -> Option<&mut [Self]> {
        match data {
            SampleData::Int32(v) => Some(v.as_mut_slice()),
            _ => None,
        }
    }
}

impl Sample for f32 {
    const TYPE: SampleType = SampleType::Float32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32_clipped(value: f32) -> (Self, bool) {
        (value.clamp(-1.0, 1.0), !(-1.0..=1.0).contains(&value))
    }

    fn slice(data: &SampleData) -> Option<&[Self]> {
        match data {
            SampleData::Float32(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn slice_mut(data: &mut SampleData) -> Option<&mut [Self]> {
        match data {
            SampleData::Float32(v) => Some(v.as_mut_slice()),
            _ => None,
        }
    }
}

/// Dispatch a generic body over the concrete sample vector of a [`SampleData`]
macro_rules! with_samples {
    ($data:expr, $s:ident => $body:expr) => {
        match $data {
            SampleData::Int16($s) => $body,
            SampleData::Int32($s) => $body,
            SampleData::Float32($s) => $body,
        }
    };
}

fn zero_range<S: Sample>(samples: &mut [S]) {
    samples.fill(S::default());
}

fn fill_with<S: Sample>(
    samples: &mut [S],
    channels: usize,
    f: &mut dyn FnMut(usize, usize) -> f32,
) {
    for (frame, chunk) in samples.chunks_exact_mut(channels).enumerate() {
        for (ch, sample) in chunk.iter_mut().enumerate() {
            *sample = S::from_f32(f(frame, ch));
        }
    }
}

fn map_with<S: Sample>(
    samples: &mut [S],
    channels: usize,
    f: &mut dyn FnMut(usize, usize, f32) -> f32,
) {
    for (frame, chunk) in samples.chunks_exact_mut(channels).enumerate() {
        for (ch, sample) in chunk.iter_mut().enumerate() {
            *sample = S::from_f32(f(frame, ch, sample.to_f32()));
        }
    }
}

/// Saturating accumulate; returns the number of samples that clipped
fn mix_into<S: Sample>(dst: &mut [S], src: &[S], gain: f32) -> usize {
    let mut clipped = 0;
    for (d, s) in dst.iter_mut().zip(src) {
        let (sum, clip) = S::from_f32_clipped(d.to_f32() + s.to_f32() * gain);
        *d = sum;
        clipped += clip as usize;
    }
    clipped
}

/// Unclamped float accumulate
fn accumulate_into<S: Sample>(dst: &mut [f32], src: &[S], gain: f32) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s.to_f32() * gain;
    }
}

fn convert_into<S: Sample, D: Sample>(src: &[S], dst: &mut [D]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = D::from_f32(s.to_f32());
    }
}

fn store_into<S: Sample, D: Sample>(src: &[S], dst: &mut [D]) -> usize {
    let mut clipped = 0;
    for (d, s) in dst.iter_mut().zip(src) {
        let (value, clip) = D::from_f32_clipped(s.to_f32());
        *d = value;
        clipped += clip as usize;
    }
    clipped
}

fn is_zero<S: Sample>(samples: &[S]) -> bool {
    samples.iter().all(|v| *v == S::default())
}

/// A pre-allocated block of interleaved PCM frames
///
/// The storage is allocated once with a fixed frame capacity; processing
/// only moves the valid frame count, so the audio thread never allocates.
#[derive(Debug, Clone)]
pub struct Buffer {
    format: Format,
    data: SampleData,
    frames: usize,
}

impl Buffer {
    /// Create a zeroed buffer able to hold `capacity` frames
    pub fn with_capacity(format: Format, capacity: usize) -> Self {
        let channels = format.channel_count.max(1) as usize;
        Self {
            format,
            data: SampleData::zeroed(format.sample_type, capacity * channels),
            frames: 0,
        }
    }

    /// Build a filled buffer from interleaved samples of any supported type
    pub fn from_samples<S: Sample>(format: Format, samples: &[S]) -> Self {
        let channels = format.channel_count.max(1) as usize;
        let mut buffer = Self::with_capacity(format, samples.len() / channels);
        buffer.frames = samples.len() / channels;
        with_samples!(&mut buffer.data, dst => convert_into(samples, &mut dst[..]));
        buffer
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.format.channel_count as usize
    }

    /// Number of valid frames
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Maximum number of frames this buffer can hold
    pub fn capacity(&self) -> usize {
        self.data.len() / self.channels().max(1)
    }

    /// Size of the valid region in bytes
    pub fn byte_size(&self) -> usize {
        self.frames * self.format.frame_size()
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Set the valid frame count (clamped to capacity)
    ///
    /// Newly exposed frames keep whatever the storage held.
    pub fn set_frame_count(&mut self, frames: usize) {
        self.frames = frames.min(self.capacity());
    }

    /// Mark the buffer empty without touching the storage
    pub fn clear(&mut self) {
        self.frames = 0;
    }

    /// Zero the first `frames` frames and make them valid
    pub fn silence(&mut self, frames: usize) {
        self.frames = frames.min(self.capacity());
        let end = self.frames * self.channels();
        with_samples!(&mut self.data, s => zero_range(&mut s[..end]));
    }

    /// Zero frames `[from, to)` of the storage
    pub fn silence_range(&mut self, from: usize, to: usize) {
        let channels = self.channels();
        let to = to.min(self.capacity());
        if from >= to {
            return;
        }
        with_samples!(&mut self.data, s => zero_range(&mut s[from * channels..to * channels]));
    }

    /// Typed view of the valid samples
    pub fn samples<S: Sample>(&self) -> Option<&[S]> {
        let end = self.frames * self.channels();
        S::slice(&self.data).map(|s| &s[..end])
    }

    /// Typed mutable view of the valid samples
    pub fn samples_mut<S: Sample>(&mut self) -> Option<&mut [S]> {
        let end = self.frames * self.channels();
        S::slice_mut(&mut self.data).map(|s| &mut s[..end])
    }

    /// Read one sample as normalized float
    pub fn sample_f32(&self, frame: usize, channel: usize) -> f32 {
        let idx = frame * self.channels() + channel;
        with_samples!(&self.data, s => s[idx].to_f32())
    }

    /// Copy the valid samples out as normalized floats
    pub fn to_f32_vec(&self) -> Vec<f32> {
        let end = self.frames * self.channels();
        with_samples!(&self.data, s => s[..end].iter().map(|v| v.to_f32()).collect())
    }

    /// Generate `frames` frames from a `(frame, channel) -> value` function
    pub fn fill_frames(&mut self, frames: usize, mut f: impl FnMut(usize, usize) -> f32) {
        self.frames = frames.min(self.capacity());
        let channels = self.channels();
        let end = self.frames * channels;
        with_samples!(&mut self.data, s => fill_with(&mut s[..end], channels, &mut f));
    }

    /// Transform the valid frames in place through `(frame, channel, value) -> value`
    pub fn map_frames(&mut self, mut f: impl FnMut(usize, usize, f32) -> f32) {
        let channels = self.channels();
        let end = self.frames * channels;
        with_samples!(&mut self.data, s => map_with(&mut s[..end], channels, &mut f));
    }

    /// Multiply every valid sample by `gain`
    pub fn scale(&mut self, gain: f32) {
        if gain == 1.0 {
            return;
        }
        self.map_frames(|_, _, v| v * gain);
    }

    /// Replace the contents with `src` (same format)
    pub fn copy_from(&mut self, src: &Buffer) {
        let frames = src.frames.min(self.capacity());
        self.copy_frames(0, src, 0, frames);
        self.frames = frames;
    }

    /// Copy `frames` frames from `src[src_offset..]` into `self[dst_offset..]`
    ///
    /// Both buffers must share the sample type and channel count. The
    /// valid frame count grows to cover the written region.
    pub fn copy_frames(&mut self, dst_offset: usize, src: &Buffer, src_offset: usize, frames: usize) {
        let channels = self.channels();
        if src.format.sample_type != self.format.sample_type || src.channels() != channels {
            return;
        }
        let frames = frames
            .min(self.capacity().saturating_sub(dst_offset))
            .min(src.capacity().saturating_sub(src_offset));
        let d = dst_offset * channels;
        let s = src_offset * channels;
        let n = frames * channels;
        match (&mut self.data, &src.data) {
            (SampleData::Int16(dst), SampleData::Int16(src)) => dst[d..d + n].copy_from_slice(&src[s..s + n]),
            (SampleData::Int32(dst), SampleData::Int32(src)) => dst[d..d + n].copy_from_slice(&src[s..s + n]),
            (SampleData::Float32(dst), SampleData::Float32(src)) => dst[d..d + n].copy_from_slice(&src[s..s + n]),
            _ => return,
        }
        self.frames = self.frames.max(dst_offset + frames);
    }

    /// Drop the first `frames` valid frames, moving the rest to the front
    pub fn discard_front(&mut self, frames: usize) {
        let frames = frames.min(self.frames);
        if frames == 0 {
            return;
        }
        let channels = self.channels();
        let start = frames * channels;
        let end = self.frames * channels;
        with_samples!(&mut self.data, s => s.copy_within(start..end, 0));
        self.frames -= frames;
    }

    /// Copy one channel of `src` into one channel of `self`
    ///
    /// Sample types must match; channel counts may differ.
    pub fn copy_channel(&mut self, dst_channel: usize, src: &Buffer, src_channel: usize, frames: usize) {
        let dst_channels = self.channels();
        let src_channels = src.channels();
        if src.format.sample_type != self.format.sample_type
            || dst_channel >= dst_channels
            || src_channel >= src_channels
        {
            return;
        }
        let frames = frames.min(self.capacity()).min(src.capacity());
        fn copy<S: Copy>(dst: &mut [S], dc: usize, di: usize, src: &[S], sc: usize, si: usize, frames: usize) {
            for frame in 0..frames {
                dst[frame * dc + di] = src[frame * sc + si];
            }
        }
        match (&mut self.data, &src.data) {
            (SampleData::Int16(d), SampleData::Int16(s)) => copy(d, dst_channels, dst_channel, s, src_channels, src_channel, frames),
            (SampleData::Int32(d), SampleData::Int32(s)) => copy(d, dst_channels, dst_channel, s, src_channels, src_channel, frames),
            (SampleData::Float32(d), SampleData::Float32(s)) => copy(d, dst_channels, dst_channel, s, src_channels, src_channel, frames),
            _ => return,
        }
        self.frames = self.frames.max(frames);
    }

    /// Sum `src * gain` into `self` starting at `dst_offset`, saturating
    ///
    /// Returns the number of samples that clipped. Formats must match.
    pub fn mix_from(&mut self, dst_offset: usize, src: &Buffer, gain: f32) -> usize {
        self.mix_frames(dst_offset, src, src.frames, gain)
    }

    /// Like [`Buffer::mix_from`] but only the first `frames` frames of `src`
    pub fn mix_frames(&mut self, dst_offset: usize, src: &Buffer, frames: usize, gain: f32) -> usize {
        let channels = self.channels();
        if src.format.sample_type != self.format.sample_type || src.channels() != channels {
            return 0;
        }
        let frames = frames
            .min(src.frames)
            .min(self.capacity().saturating_sub(dst_offset));
        let d = dst_offset * channels;
        let n = frames * channels;
        let clipped = match (&mut self.data, &src.data) {
            (SampleData::Int16(dst), SampleData::Int16(s)) => mix_into(&mut dst[d..d + n], &s[..n], gain),
            (SampleData::Int32(dst), SampleData::Int32(s)) => mix_into(&mut dst[d..d + n], &s[..n], gain),
            (SampleData::Float32(dst), SampleData::Float32(s)) => mix_into(&mut dst[d..d + n], &s[..n], gain),
            _ => 0,
        };
        self.frames = self.frames.max(dst_offset + frames);
        clipped
    }

    /// Add `src * gain` into this float buffer at `dst_offset`, without clamping
    ///
    /// `self` must be `Float32`; `src` may be any sample type with the same
    /// channel count. Saturation is decided later by [`Buffer::store_frames`].
    pub fn accumulate(&mut self, dst_offset: usize, src: &Buffer, gain: f32) {
        self.accumulate_frames(dst_offset, src, src.frames, gain);
    }

    /// Like [`Buffer::accumulate`] but only the first `frames` frames of `src`
    pub fn accumulate_frames(&mut self, dst_offset: usize, src: &Buffer, frames: usize, gain: f32) {
        let channels = self.channels();
        if src.channels() != channels {
            return;
        }
        let frames = frames
            .min(src.frames)
            .min(self.capacity().saturating_sub(dst_offset));
        let d = dst_offset * channels;
        let n = frames * channels;
        let SampleData::Float32(dst) = &mut self.data else {
            return;
        };
        with_samples!(&src.data, s => accumulate_into(&mut dst[d..d + n], &s[..n], gain));
        self.frames = self.frames.max(dst_offset + frames);
    }

    /// Overwrite `frames` frames at `dst_offset` with `src` converted to this
    /// buffer's sample type
    ///
    /// Returns the number of samples that saturated. Channel counts must match.
    pub fn store_frames(&mut self, dst_offset: usize, src: &Buffer, frames: usize) -> usize {
        let channels = self.channels();
        if src.channels() != channels {
            return 0;
        }
        let frames = frames
            .min(src.frames)
            .min(self.capacity().saturating_sub(dst_offset));
        let d = dst_offset * channels;
        let n = frames * channels;
        let clipped = with_samples!(&src.data, s => with_samples!(&mut self.data, dst => store_into(&s[..n], &mut dst[d..d + n])));
        self.frames = self.frames.max(dst_offset + frames);
        clipped
    }

    /// Convert the valid frames of `src` into this buffer's sample type
    ///
    /// Channel counts must match.
    pub fn convert_from(&mut self, src: &Buffer) {
        if src.channels() != self.channels() {
            return;
        }
        let frames = src.frames.min(self.capacity());
        let n = frames * self.channels();
        with_samples!(&src.data, s => with_samples!(&mut self.data, d => convert_into(&s[..n], &mut d[..n])));
        self.frames = frames;
    }

    /// Write the valid frames into an interleaved float slice
    pub fn write_f32(&self, out: &mut [f32]) -> usize {
        let n = (self.frames * self.channels()).min(out.len());
        with_samples!(&self.data, s => convert_into(&s[..n], &mut out[..n]));
        n
    }

    /// Read interleaved floats into the buffer, converting to its sample type
    pub fn read_f32(&mut self, input: &[f32]) {
        let channels = self.channels().max(1);
        let frames = (input.len() / channels).min(self.capacity());
        let n = frames * channels;
        with_samples!(&mut self.data, d => convert_into(&input[..n], &mut d[..n]));
        self.frames = frames;
    }

    /// Append interleaved samples behind the valid frames
    ///
    /// Samples of the buffer's own type are copied verbatim, others are
    /// converted. Returns the number of frames appended.
    pub fn append_samples<S: Sample>(&mut self, samples: &[S]) -> usize {
        let channels = self.channels().max(1);
        let start = self.frames;
        let frames = (samples.len() / channels).min(self.capacity().saturating_sub(start));
        let (from, to) = (start * channels, (start + frames) * channels);
        let src = &samples[..frames * channels];
        match S::slice_mut(&mut self.data) {
            Some(dst) => dst[from..to].copy_from_slice(src),
            None => with_samples!(&mut self.data, d => convert_into(src, &mut d[from..to])),
        }
        self.frames += frames;
        frames
    }

    /// Read `out.len()` frames of one channel starting at `offset` as floats
    pub fn read_channel_f32(&self, channel: usize, offset: usize, out: &mut [f32]) {
        let channels = self.channels();
        with_samples!(&self.data, s => {
            for (i, value) in out.iter_mut().enumerate() {
                *value = s[(offset + i) * channels + channel].to_f32();
            }
        })
    }

    /// Append `frames` frames of planar float data starting at `src_offset`
    ///
    /// Writes behind the valid frames and converts to this buffer's sample
    /// type. Returns the number of frames actually appended.
    pub fn append_planar_f32<P: AsRef<[f32]>>(&mut self, planes: &[P], src_offset: usize, frames: usize) -> usize {
        let channels = self.channels();
        let start = self.frames;
        let frames = frames.min(self.capacity().saturating_sub(start));
        fn write<S: Sample, P: AsRef<[f32]>>(dst: &mut [S], channels: usize, start: usize, planes: &[P], src: usize, frames: usize) {
            for (ch, plane) in planes.iter().enumerate().take(channels) {
                let plane = plane.as_ref();
                for i in 0..frames {
                    dst[(start + i) * channels + ch] = S::from_f32(plane[src + i]);
                }
            }
        }
        with_samples!(&mut self.data, d => write(d, channels, start, planes, src_offset, frames));
        self.frames += frames;
        frames
    }

    /// Peak absolute amplitude of the valid frames
    pub fn peak(&self) -> f32 {
        let end = self.frames * self.channels();
        with_samples!(&self.data, s => s[..end].iter().fold(0.0f32, |acc, v| acc.max(v.to_f32().abs())))
    }

    /// Check every valid sample is exactly zero
    pub fn is_silent(&self) -> bool {
        let end = self.frames * self.channels();
        with_samples!(&self.data, s => is_zero(&s[..end]))
    }
}

/// Buffers compare by format and valid frames; spare capacity is ignored
impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        if self.format != other.format || self.frames != other.frames {
            return false;
        }
        let n = self.frames * self.channels();
        match (&self.data, &other.data) {
            (SampleData::Int16(a), SampleData::Int16(b)) => a[..n] == b[..n],
            (SampleData::Int32(a), SampleData::Int32(b)) => a[..n] == b[..n],
            (SampleData::Float32(a), SampleData::Float32(b)) => a[..n] == b[..n],
            _ => false,
        }
    }
}
