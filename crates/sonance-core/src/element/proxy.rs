//! Proxy element - runs an inner source on its own worker thread
//!
//! Useful for sources whose `process` is too slow or too bursty for the
//! audio thread (large decodes, remote streams). Two `rtrb` rings circulate
//! a fixed set of pre-allocated chunks:
//!
//! ```text
//!   worker ──► filled ring ──► audio thread (Proxy::process)
//!      ▲                              │
//!      └────────── empty ring ◄───────┘
//! ```
//!
//! The audio side never blocks: when no filled chunk is ready the pass is
//! short (an underrun), and the graph pads it or retries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{
    Element, ElementBase, ElementError, ElementResult, ElementSlot, PrepareContext, ProcessContext,
    Status,
};
use crate::types::{Buffer, Format};

/// Chunks in flight between the worker and the audio thread
pub const DEFAULT_DEPTH: usize = 4;

/// Worker poll interval while every chunk is full
const IDLE_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkStatus {
    More,
    Done,
    Failed,
}

struct Chunk {
    buffer: Buffer,
    status: ChunkStatus,
}

/// Worker side state; owns the inner source until the stream ends
struct Worker {
    slot: ElementSlot,
    frames: usize,
    empty: rtrb::Consumer<Chunk>,
    filled: rtrb::Producer<Chunk>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self) {
        while !self.stop.load(Ordering::Acquire) {
            let Ok(mut chunk) = self.empty.pop() else {
                thread::park_timeout(IDLE_WAIT);
                continue;
            };
            chunk.buffer.clear();
            let result = {
                let mut ctx = ProcessContext::for_outputs(self.frames, std::slice::from_mut(&mut chunk.buffer));
                self.slot.element_mut().process(&mut ctx)
            };
            chunk.status = match result {
                Ok(Status::More) => ChunkStatus::More,
                Ok(Status::Done) => ChunkStatus::Done,
                Err(e) => {
                    log::warn!("Proxied source '{}' failed: {}", self.slot.element().name(), e);
                    ChunkStatus::Failed
                }
            };
            let finished = chunk.status != ChunkStatus::More;
            if self.filled.push(chunk).is_err() {
                // ring sized to the chunk count, cannot be full
                break;
            }
            if finished {
                break;
            }
        }
        self.slot.shutdown();
    }
}

/// Runs a source element on a dedicated thread
pub struct Proxy {
    base: ElementBase,
    pending: Option<ElementSlot>,
    depth: usize,
    format: Format,
    filled: Option<rtrb::Consumer<Chunk>>,
    empty: Option<rtrb::Producer<Chunk>>,
    current: Option<Chunk>,
    offset: usize,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    underruns: Arc<AtomicU64>,
    finished: bool,
}

impl Proxy {
    pub fn new(id: impl Into<String>, name: impl Into<String>, inner: Box<dyn Element>) -> Self {
        Self {
            base: ElementBase::new(id, name).with_output("out"),
            pending: Some(ElementSlot::new(inner)),
            depth: DEFAULT_DEPTH,
            format: Format::default(),
            filled: None,
            empty: None,
            current: None,
            offset: 0,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            underruns: Arc::new(AtomicU64::new(0)),
            finished: false,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(2);
        self
    }

    /// Passes that found no filled chunk waiting
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn stop_worker(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::error!("Proxy '{}' worker panicked", self.name());
            }
        }
        self.filled = None;
        self.empty = None;
        self.current = None;
    }

    fn recycle(&mut self, chunk: Chunk) {
        if let Some(empty) = self.empty.as_mut() {
            let _ = empty.push(chunk);
        }
    }
}

impl Element for Proxy {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Proxy"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let mut slot = self.pending.take().ok_or(ElementError::Proxy("source already started"))?;
        let formats = slot.element_mut().prepare(&ctx.for_inputs(&[]))?;
        let format = match formats.as_slice() {
            [format] => *format,
            _ => {
                return Err(ElementError::invalid_argument(
                    self.name(),
                    "source",
                    "must have exactly one output",
                ))
            }
        };
        let frames = ctx.max_frames().max(1);
        slot.element_mut().reserve(frames);
        self.format = format;

        let (mut empty_tx, empty_rx) = rtrb::RingBuffer::<Chunk>::new(self.depth);
        let (filled_tx, filled_rx) = rtrb::RingBuffer::<Chunk>::new(self.depth);
        for _ in 0..self.depth {
            let chunk = Chunk {
                buffer: Buffer::with_capacity(format, frames),
                status: ChunkStatus::More,
            };
            let _ = empty_tx.push(chunk);
        }

        self.stop.store(false, Ordering::Release);
        let worker = Worker {
            slot,
            frames,
            empty: empty_rx,
            filled: filled_tx,
            stop: self.stop.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("audio-proxy-{}", self.id()))
            .spawn(move || worker.run())
            .map_err(ElementError::Spawn)?;
        log::debug!("Proxy '{}' started worker ({} x {} frames)", self.name(), self.depth, frames);

        self.worker = Some(handle);
        self.filled = Some(filled_rx);
        self.empty = Some(empty_tx);
        self.finished = false;
        Ok(vec![format])
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let frames = ctx.frames();
        let out = ctx.output(0);
        out.clear();

        let mut written = 0;
        while written < frames && !self.finished {
            if self.current.is_none() {
                let Some(filled) = self.filled.as_mut() else {
                    return Err(ElementError::NotPrepared(self.base.name().to_string()));
                };
                match filled.pop() {
                    Ok(chunk) => {
                        self.current = Some(chunk);
                        self.offset = 0;
                    }
                    Err(_) => {
                        self.underruns.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            }
            let Some(chunk) = self.current.as_ref() else {
                break;
            };
            if chunk.status == ChunkStatus::Failed {
                self.finished = true;
                return Err(ElementError::Proxy("inner source failed"));
            }
            let available = chunk.buffer.frame_count() - self.offset;
            let n = available.min(frames - written);
            out.copy_frames(written, &chunk.buffer, self.offset, n);
            written += n;
            self.offset += n;

            if self.offset == chunk.buffer.frame_count() {
                let done = chunk.status == ChunkStatus::Done;
                if let Some(chunk) = self.current.take() {
                    self.recycle(chunk);
                }
                self.finished = done;
            }
        }

        Ok(if self.finished { Status::Done } else { Status::More })
    }

    fn shutdown(&mut self) {
        self.stop_worker();
        // a source that was never started still gets its shutdown
        if let Some(mut slot) = self.pending.take() {
            slot.shutdown();
        }
    }

    fn describe(&self) -> String {
        format!(
            "Proxy '{}' depth={} underruns={}",
            self.name(),
            self.depth,
            self.underruns()
        )
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementParam, SineSource};
    use crate::loader::NoResources;
    use crate::types::SampleType;
    use std::sync::atomic::AtomicUsize;

    fn mono() -> Format {
        Format::new(SampleType::Int16, 1000, 1)
    }

    /// Pull until done, tolerating underruns
    fn pull_all(proxy: &mut Proxy, frames: usize) -> ElementResult<Vec<i16>> {
        let mut out = vec![Buffer::with_capacity(proxy.format, frames)];
        let mut samples = Vec::new();
        for _ in 0..10_000 {
            let status = {
                let mut ctx = ProcessContext::for_outputs(frames, &mut out);
                proxy.process(&mut ctx)?
            };
            samples.extend_from_slice(out[0].samples::<i16>().unwrap());
            if status == Status::Done {
                return Ok(samples);
            }
            thread::sleep(Duration::from_micros(200));
        }
        panic!("proxy never finished");
    }

    #[test]
    fn test_proxy_delivers_whole_stream() {
        let sine = SineSource::new("s", "sine", mono(), 50.0, 100);
        let mut proxy = Proxy::new("p", "proxy", Box::new(sine));
        let ctx = PrepareContext::new(&[], 16, &NoResources);
        assert_eq!(proxy.prepare(&ctx).unwrap(), vec![mono()]);

        let got = pull_all(&mut proxy, 10).unwrap();

        // same call size as the worker so the phase arithmetic matches
        let mut direct = SineSource::new("d", "direct", mono(), 50.0, 100);
        direct.prepare(&PrepareContext::source(16)).unwrap();
        let mut out = vec![Buffer::with_capacity(mono(), 16)];
        let mut expected = Vec::new();
        loop {
            let status = direct.process(&mut ProcessContext::for_outputs(16, &mut out)).unwrap();
            expected.extend_from_slice(out[0].samples::<i16>().unwrap());
            if status == Status::Done {
                break;
            }
        }
        assert_eq!(got, expected);
        proxy.shutdown();
    }

    struct Failing {
        base: ElementBase,
        shutdowns: Arc<AtomicUsize>,
    }

    impl Element for Failing {
        fn base(&self) -> &ElementBase {
            &self.base
        }
        fn kind(&self) -> &'static str {
            "Failing"
        }
        fn prepare(&mut self, _ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
            Ok(vec![Format::new(SampleType::Int16, 1000, 1)])
        }
        fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
            Err(self.base.unsupported(&ElementParam::Gain(0.0)))
        }
        fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_inner_failure_surfaces_and_shuts_down_once() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let failing = Failing {
            base: ElementBase::new("f", "failing").with_output("out"),
            shutdowns: shutdowns.clone(),
        };
        let mut proxy = Proxy::new("p", "proxy", Box::new(failing));
        proxy.prepare(&PrepareContext::new(&[], 8, &NoResources)).unwrap();
        let err = pull_all(&mut proxy, 8).unwrap_err();
        assert!(matches!(err, ElementError::Proxy(_)));
        proxy.shutdown();
        proxy.shutdown();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unstarted_source_is_shut_down() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let failing = Failing {
            base: ElementBase::new("f", "failing").with_output("out"),
            shutdowns: shutdowns.clone(),
        };
        let mut proxy = Proxy::new("p", "proxy", Box::new(failing));
        proxy.shutdown();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
