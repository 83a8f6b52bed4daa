//! Period ring - rendered periods handed between two threads
//!
//! A fixed set of period buffers circulates through two `rtrb` rings, the
//! same way the proxy element moves chunks:
//!
//! ```text
//!   RingWriter ──► filled ring ──► RingReader
//!       ▲                              │
//!       └────────── empty ring ◄───────┘
//! ```
//!
//! The reader never blocks: when no rendered period is waiting the rest of
//! its request is silence and an underrun is counted. [`RingDevice`] wraps
//! the writer side in a feeder thread so any consumer can read a device's
//! output at its own pace.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::backend::{validate, AudioDevice, DeviceInfo, RenderCallback};
use super::error::{AudioError, AudioResult};
use crate::types::{Buffer, Format};

/// Periods buffered by a [`RingDevice`] unless configured otherwise
pub const DEFAULT_RING_PERIODS: usize = 4;

/// Create a ring of `periods` buffers of `period_frames` frames each
pub fn period_ring(format: Format, period_frames: usize, periods: usize) -> (RingWriter, RingReader) {
    let periods = periods.max(2);
    let (mut empty_tx, empty_rx) = rtrb::RingBuffer::<Buffer>::new(periods);
    let (filled_tx, filled_rx) = rtrb::RingBuffer::<Buffer>::new(periods);
    for _ in 0..periods {
        let _ = empty_tx.push(Buffer::with_capacity(format, period_frames));
    }
    (
        RingWriter {
            empty: empty_rx,
            filled: filled_tx,
            period_frames,
        },
        RingReader {
            filled: filled_rx,
            empty: empty_tx,
            current: None,
            offset: 0,
            underruns: Arc::new(AtomicU64::new(0)),
        },
    )
}

/// Producer side: renders into free periods
pub struct RingWriter {
    empty: rtrb::Consumer<Buffer>,
    filled: rtrb::Producer<Buffer>,
    period_frames: usize,
}

impl RingWriter {
    pub fn has_space(&self) -> bool {
        !self.empty.is_empty()
    }

    pub fn period_frames(&self) -> usize {
        self.period_frames
    }

    /// Render one period if a free one is available
    pub fn write_with(&mut self, render: impl FnOnce(&mut Buffer)) -> bool {
        let Ok(mut buffer) = self.empty.pop() else {
            return false;
        };
        buffer.silence(self.period_frames);
        render(&mut buffer);
        // both rings hold every buffer, so this side cannot be full
        let _ = self.filled.push(buffer);
        true
    }
}

/// Consumer side: copies rendered periods out
pub struct RingReader {
    filled: rtrb::Consumer<Buffer>,
    empty: rtrb::Producer<Buffer>,
    current: Option<Buffer>,
    offset: usize,
    underruns: Arc<AtomicU64>,
}

impl RingReader {
    /// Fill the `out.frame_count()` requested frames, silence where the ring ran dry
    ///
    /// Returns how many frames were real audio.
    pub fn read_into(&mut self, out: &mut Buffer) -> usize {
        let frames = out.frame_count();
        let mut written = 0;
        while written < frames {
            if self.current.is_none() {
                match self.filled.pop() {
                    Ok(buffer) => {
                        self.current = Some(buffer);
                        self.offset = 0;
                    }
                    Err(_) => break,
                }
            }
            let Some(chunk) = self.current.as_ref() else {
                break;
            };
            let n = (chunk.frame_count() - self.offset).min(frames - written);
            out.copy_frames(written, chunk, self.offset, n);
            written += n;
            self.offset += n;
            if self.offset >= chunk.frame_count() {
                if let Some(done) = self.current.take() {
                    let _ = self.empty.push(done);
                }
            }
        }
        if written < frames {
            self.underruns.fetch_add(1, Ordering::Relaxed);
            out.silence_range(written, frames);
        }
        written
    }

    /// Rendered periods waiting to be read
    pub fn queued(&self) -> usize {
        self.filled.slots()
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Shared counter, readable after the reader moved to another thread
    pub fn underrun_counter(&self) -> Arc<AtomicU64> {
        self.underruns.clone()
    }
}

/// A device whose output is read from a period ring
///
/// A feeder thread renders whenever the ring has a free period; the host
/// drains it through the [`RingOutput`] returned by [`RingDevice::new`].
pub struct RingDevice {
    name: String,
    periods: usize,
    output: Arc<Mutex<Option<RingReader>>>,
    stop: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

/// Host side of a [`RingDevice`]
#[derive(Clone)]
pub struct RingOutput {
    reader: Arc<Mutex<Option<RingReader>>>,
}

impl RingOutput {
    /// Read `out.frame_count()` frames; `None` while the device is closed
    pub fn read_into(&self, out: &mut Buffer) -> Option<usize> {
        self.reader.lock().as_mut().map(|reader| reader.read_into(out))
    }

    pub fn underruns(&self) -> u64 {
        self.reader.lock().as_ref().map_or(0, RingReader::underruns)
    }
}

impl RingDevice {
    pub fn new(periods: usize) -> (Self, RingOutput) {
        let output = Arc::new(Mutex::new(None));
        let device = Self {
            name: "ring".to_string(),
            periods: periods.max(2),
            output: output.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            feeder: None,
        };
        (device, RingOutput { reader: output })
    }
}

impl AudioDevice for RingDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, format: Format, period_frames: usize, mut render: RenderCallback) -> AudioResult<DeviceInfo> {
        if self.feeder.is_some() {
            return Err(AudioError::AlreadyOpen(self.name.clone()));
        }
        validate(format, period_frames)?;
        let (mut writer, reader) = period_ring(format, period_frames, self.periods);
        *self.output.lock() = Some(reader);

        // poll a few times per period while the ring is full
        let idle = Duration::from_secs_f64(period_frames as f64 / format.sample_rate as f64 / 4.0);
        self.stop.store(false, Ordering::Release);
        let stop = self.stop.clone();
        let feeder = thread::Builder::new()
            .name("audio-ring-feeder".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    if !writer.write_with(|buffer| render(buffer)) {
                        thread::park_timeout(idle);
                    }
                }
            })
            .map_err(AudioError::Spawn)?;
        self.feeder = Some(feeder);

        log::info!(
            "Ring device opened: {}, {} frames x {} periods",
            format,
            period_frames,
            self.periods
        );
        Ok(DeviceInfo {
            name: self.name.clone(),
            format,
            period_frames,
        })
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(feeder) = self.feeder.take() {
            feeder.thread().unpark();
            if feeder.join().is_err() {
                log::error!("Ring device feeder panicked");
            }
            log::info!("Ring device closed");
        }
        *self.output.lock() = None;
    }

    fn is_open(&self) -> bool {
        self.feeder.is_some()
    }
}

impl Drop for RingDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleType;

    fn mono() -> Format {
        Format::new(SampleType::Int16, 1000, 1)
    }

    #[test]
    fn test_reader_spans_periods() {
        let (mut writer, mut reader) = period_ring(mono(), 4, 3);
        let mut counter = 0i16;
        while writer.write_with(|b| {
            let samples = b.samples_mut::<i16>().unwrap();
            for s in samples.iter_mut() {
                counter += 1;
                *s = counter;
            }
        }) {}
        assert_eq!(reader.queued(), 3);

        let mut out = Buffer::with_capacity(mono(), 6);
        out.set_frame_count(6);
        assert_eq!(reader.read_into(&mut out), 6);
        assert_eq!(out.samples::<i16>().unwrap(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(reader.read_into(&mut out), 6);
        assert_eq!(out.samples::<i16>().unwrap(), &[7, 8, 9, 10, 11, 12]);
        assert_eq!(reader.underruns(), 0);
        assert!(writer.has_space());
    }

    #[test]
    fn test_underrun_is_silent_and_counted() {
        let (mut writer, mut reader) = period_ring(mono(), 4, 2);
        writer.write_with(|b| b.fill_frames(4, |_, _| 0.5));
        let mut out = Buffer::with_capacity(mono(), 8);
        out.set_frame_count(8);
        assert_eq!(reader.read_into(&mut out), 4);
        let samples = out.samples::<i16>().unwrap();
        assert!(samples[..4].iter().all(|&s| s > 0));
        assert!(samples[4..].iter().all(|&s| s == 0));
        assert_eq!(reader.underruns(), 1);
    }

    #[test]
    fn test_ring_device_feeds_consumer() {
        let (mut device, output) = RingDevice::new(4);
        let mut out = Buffer::with_capacity(mono(), 16);
        out.set_frame_count(16);
        assert_eq!(output.read_into(&mut out), None);

        device
            .open(mono(), 16, Box::new(|b: &mut Buffer| b.fill_frames(16, |_, _| 0.25)))
            .unwrap();
        assert!(device.is_open());
        let mut real = 0;
        for _ in 0..200 {
            out.set_frame_count(16);
            real = output.read_into(&mut out).unwrap();
            if real == 16 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(real, 16);
        assert!((out.peak() - 0.25).abs() < 1e-3);
        device.close();
        assert!(!device.is_open());
        assert_eq!(output.read_into(&mut out), None);
    }
}
