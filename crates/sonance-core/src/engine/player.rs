//! Player - the caller-facing control surface
//!
//! A [`Player`] owns one output device and the playback engine feeding it.
//! Callers only ever enqueue commands and poll events; graph preparation,
//! resource lookup and format checks happen synchronously inside
//! [`PlayerHandle::play`], so a bad path or an incompatible graph fails the
//! call instead of surfacing later on the audio thread.
//!
//! # Threading
//!
//! Where the engine renders is a [`Threading`] choice:
//!
//! - `DeviceCallback`: inside the device callback itself
//! - `Dedicated`: on an `audio-player` thread writing periods into a ring
//!   that the device callback drains
//! - `HostPumped`: into the same ring, but only when the host calls
//!   [`Player::pump_once`]; deferred teardown also runs there
//!
//! The engine contract is identical in all three.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::{self, period_ring, AudioDevice, AudioError, DeviceInfo, RingWriter};
use crate::config::PlayerConfig;
use crate::element::{
    Element, ElementError, ElementParam, ElementSlot, FileSource, MakerChannel, PrepareContext, Resampler,
    SourceId, StereoMaker,
};
use crate::graph::{create_element, ElementDesc, Graph, GraphClass};
use crate::loader::{IoStrategy, ResourceLoader};
use crate::types::{Buffer, Format};

use super::command::{EngineCommand, PlayerEvent, TrackId};
use super::engine::{EngineStats, PlaybackEngine, StatsSnapshot};
use super::gc::Reclaimer;
use super::queue::MessageQueue;
use super::track::TrackStatus;

/// Where the engine renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Threading {
    /// Render inside the device callback
    DeviceCallback,
    /// Render ahead on a dedicated playback thread
    Dedicated,
    /// Render when the host calls `pump_once`
    HostPumped,
}

impl Default for Threading {
    fn default() -> Self {
        if cfg!(feature = "player-thread") {
            Threading::Dedicated
        } else {
            Threading::HostPumped
        }
    }
}

/// Errors returned to player callers
#[derive(Error, Debug)]
pub enum PlayerError {
    /// The command queue is full; the command was not sent
    #[error("Command queue is full")]
    QueueFull,

    #[error("Unknown track {0}")]
    UnknownTrack(TrackId),

    #[error("Track {track} has no element named '{element}'")]
    UnknownElement { track: TrackId, element: String },

    #[error("Element '{element}' of track {track} is not a queue")]
    NotAQueue { track: TrackId, element: String },

    /// The graph output does not match the player's stream format
    #[error("Format mismatch: player plays {expected}, graph produces {found}")]
    FormatMismatch { expected: Format, found: Format },

    #[error(transparent)]
    Element(#[from] ElementError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("Failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// The player this handle belongs to has been dropped
    #[error("Player is closed")]
    Closed,
}

impl PlayerError {
    /// Check whether a play failed because its resource does not exist
    pub fn is_resource_not_found(&self) -> bool {
        matches!(self, PlayerError::Element(e) if e.is_resource_not_found())
    }
}

/// Result type for player operations
pub type PlayerResult<T> = Result<T, PlayerError>;

/// What to play
pub enum PlaySource {
    /// A resource path resolved by the player's loader
    Path(String),
    /// A blueprint, instantiated for this track
    Class(GraphClass),
    /// A ready graph, prepared now if it is not yet
    Graph(Graph),
}

impl From<&str> for PlaySource {
    fn from(path: &str) -> Self {
        PlaySource::Path(path.to_string())
    }
}

impl From<String> for PlaySource {
    fn from(path: String) -> Self {
        PlaySource::Path(path)
    }
}

impl From<GraphClass> for PlaySource {
    fn from(class: GraphClass) -> Self {
        PlaySource::Class(class)
    }
}

impl From<Graph> for PlaySource {
    fn from(graph: Graph) -> Self {
        PlaySource::Graph(graph)
    }
}

/// Per-track playback options
#[derive(Debug, Clone, PartialEq)]
pub struct PlayOptions {
    /// Linear gain applied while mixing
    pub gain: f32,
    /// Silence before the first frame, sample-accurate
    pub delay_ms: u32,
    /// Repeat a resource path until cancelled
    pub looping: bool,
    /// Label for logs; defaults to the source name
    pub name: Option<String>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            gain: 1.0,
            delay_ms: 0,
            looping: false,
            name: None,
        }
    }
}

impl PlayOptions {
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u32) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Caller-side view of one element of a live track
#[derive(Debug, Clone)]
struct ElementInfo {
    name: String,
    kind: &'static str,
    format: Option<Format>,
    capacity: usize,
}

/// Caller-side record of a live track
///
/// Kept until the audio side retires the track or its terminal event is
/// read, whichever is noticed first.
struct TrackEntry {
    elements: Vec<ElementInfo>,
    status: basedrop::Shared<TrackStatus>,
}

impl TrackEntry {
    fn from_graph(graph: &Graph, period_frames: usize, status: basedrop::Shared<TrackStatus>) -> Self {
        let elements = (0..graph.len())
            .filter_map(|i| {
                graph.element(i).map(|element| ElementInfo {
                    name: element.name().to_string(),
                    kind: element.kind(),
                    format: graph.element_formats(i).and_then(|f| f.first().copied()),
                    capacity: graph.element_capacity(i).unwrap_or(period_frames),
                })
            })
            .collect();
        Self { elements, status }
    }

    fn find(&self, name: &str) -> Option<(usize, &ElementInfo)> {
        self.elements.iter().enumerate().find(|(_, e)| e.name == name)
    }
}

struct Shared {
    format: Format,
    period_frames: usize,
    io_strategy: IoStrategy,
    loader: Arc<dyn ResourceLoader>,
    commands: Arc<MessageQueue<EngineCommand>>,
    events: Arc<MessageQueue<PlayerEvent>>,
    gc: basedrop::Handle,
    next_id: AtomicU64,
    next_source: AtomicU64,
    tracks: Mutex<HashMap<TrackId, TrackEntry>>,
    stats: Arc<EngineStats>,
    closed: AtomicBool,
}

/// Cloneable, thread-safe control handle of a [`Player`]
#[derive(Clone)]
pub struct PlayerHandle {
    shared: Arc<Shared>,
}

impl PlayerHandle {
    /// Stream format every track is mixed in
    pub fn format(&self) -> Format {
        self.shared.format
    }

    /// Prepare `source` and start it; returns once the command is queued
    pub fn play(&self, source: impl Into<PlaySource>, options: PlayOptions) -> PlayerResult<TrackId> {
        self.ensure_open()?;
        let graph = self.build(source.into(), options.looping)?;
        let name = options.name.clone().unwrap_or_else(|| graph.name().to_string());

        let id = TrackId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let status = basedrop::Shared::new(&self.shared.gc, TrackStatus::default());
        let entry = TrackEntry::from_graph(&graph, self.shared.period_frames, status.clone());
        {
            let mut tracks = self.shared.tracks.lock();
            tracks.retain(|_, entry| !entry.status.is_retired());
            tracks.insert(id, entry);
        }

        let command = EngineCommand::Play {
            track: id,
            graph: basedrop::Owned::new(&self.shared.gc, graph),
            status,
            gain: options.gain,
            delay_frames: self.shared.format.frames_for_millis(options.delay_ms) as u64,
        };
        if let Err(e) = self.send(command) {
            self.shared.tracks.lock().remove(&id);
            return Err(e);
        }
        log::debug!("Track {} queued: '{}'", id, name);
        Ok(id)
    }

    /// Hold a track; pausing a paused track does nothing
    pub fn pause(&self, track: TrackId) -> PlayerResult<()> {
        self.require(track)?;
        self.send(EngineCommand::Pause(track))
    }

    pub fn resume(&self, track: TrackId) -> PlayerResult<()> {
        self.require(track)?;
        self.send(EngineCommand::Resume(track))
    }

    /// Stop a track; its teardown runs on the reclaimer, never here
    pub fn cancel(&self, track: TrackId) -> PlayerResult<()> {
        self.require(track)?;
        self.send(EngineCommand::Cancel(track))
    }

    pub fn set_gain(&self, track: TrackId, gain: f32) -> PlayerResult<()> {
        self.require(track)?;
        self.send(EngineCommand::SetGain { track, gain })
    }

    /// Send a parameter to the element named `element` of `track`
    pub fn set_param(&self, track: TrackId, element: &str, param: ElementParam) -> PlayerResult<()> {
        let index = self.with_entry(track, |entry| {
            entry
                .find(element)
                .map(|(index, _)| index)
                .ok_or_else(|| PlayerError::UnknownElement {
                    track,
                    element: element.to_string(),
                })
        })?;
        self.send(EngineCommand::SetParam {
            track,
            element: index,
            param,
        })
    }

    /// Build, prepare and append a source to the queue element `queue`
    ///
    /// The returned id addresses the source in later queue commands and in
    /// its [`crate::element::ElementNotice::SourceDone`] event.
    pub fn enqueue(&self, track: TrackId, queue: &str, desc: &ElementDesc) -> PlayerResult<SourceId> {
        let (index, format, capacity) = self.with_entry(track, |entry| {
            let (index, info) = Self::queue_info(entry, track, queue)?;
            Ok((index, info.format.unwrap_or(self.shared.format), info.capacity))
        })?;

        let mut slot = ElementSlot::new(create_element(desc)?);
        if !slot.element().is_source() {
            return Err(ElementError::invalid_argument(desc.name.as_str(), "type", "queued elements must be sources").into());
        }
        let ctx = PrepareContext::new(&[], capacity, self.shared.loader.as_ref())
            .with_strategy(self.shared.io_strategy);
        let formats = slot.element_mut().prepare(&ctx)?;
        if formats.as_slice() != [format] {
            return Err(PlayerError::FormatMismatch {
                expected: format,
                found: formats.first().copied().unwrap_or_default(),
            });
        }
        slot.element_mut().reserve(capacity);

        let id = SourceId(self.shared.next_source.fetch_add(1, Ordering::Relaxed));
        self.send(EngineCommand::Enqueue {
            track,
            element: index,
            id,
            source: basedrop::Owned::new(&self.shared.gc, slot),
        })?;
        Ok(id)
    }

    /// Drop one source from the queue element `queue`, playing or not
    pub fn remove_source(&self, track: TrackId, queue: &str, source: SourceId) -> PlayerResult<()> {
        self.queue_param(track, queue, ElementParam::RemoveSource(source))
    }

    /// Hold or release one source of the queue element `queue`
    pub fn pause_source(&self, track: TrackId, queue: &str, source: SourceId, paused: bool) -> PlayerResult<()> {
        self.queue_param(track, queue, ElementParam::PauseSource { source, paused })
    }

    /// Drop every source of the queue element `queue`
    pub fn clear_queue(&self, track: TrackId, queue: &str) -> PlayerResult<()> {
        self.queue_param(track, queue, ElementParam::ClearSources)
    }

    /// Hold or release input `port` of the mixer element `mixer`
    pub fn pause_input(&self, track: TrackId, mixer: &str, port: usize, paused: bool) -> PlayerResult<()> {
        self.set_param(track, mixer, ElementParam::PauseInput { port, paused })
    }

    fn queue_param(&self, track: TrackId, queue: &str, param: ElementParam) -> PlayerResult<()> {
        let index = self.with_entry(track, |entry| Self::queue_info(entry, track, queue).map(|(index, _)| index))?;
        self.send(EngineCommand::SetParam {
            track,
            element: index,
            param,
        })
    }

    fn queue_info<'a>(entry: &'a TrackEntry, track: TrackId, queue: &str) -> PlayerResult<(usize, &'a ElementInfo)> {
        let (index, info) = entry.find(queue).ok_or_else(|| PlayerError::UnknownElement {
            track,
            element: queue.to_string(),
        })?;
        if info.kind != "Queue" {
            return Err(PlayerError::NotAQueue {
                track,
                element: queue.to_string(),
            });
        }
        Ok((index, info))
    }

    /// Ask for a [`PlayerEvent::TrackProgress`] report
    pub fn ask_progress(&self, track: TrackId) -> PlayerResult<()> {
        self.require(track)?;
        self.send(EngineCommand::AskProgress(track))
    }

    /// Next pending event, if any; never blocks on the audio side
    pub fn get_event(&self) -> Option<PlayerEvent> {
        let event = self.shared.events.pop()?;
        if event.is_terminal() {
            self.shared.tracks.lock().remove(&event.track());
        }
        Some(event)
    }

    /// Tracks started and not yet retired by the engine
    pub fn live_tracks(&self) -> usize {
        let mut tracks = self.shared.tracks.lock();
        tracks.retain(|_, entry| !entry.status.is_retired());
        tracks.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    fn ensure_open(&self) -> PlayerResult<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PlayerError::Closed);
        }
        Ok(())
    }

    fn require(&self, track: TrackId) -> PlayerResult<()> {
        self.with_entry(track, |_| Ok(()))
    }

    /// Run `f` on the registry entry of a live track
    ///
    /// An entry whose track the engine already retired is dropped here, so a
    /// lost terminal event cannot keep a track addressable.
    fn with_entry<R>(&self, track: TrackId, f: impl FnOnce(&TrackEntry) -> PlayerResult<R>) -> PlayerResult<R> {
        let mut tracks = self.shared.tracks.lock();
        match tracks.get(&track) {
            Some(entry) if !entry.status.is_retired() => f(entry),
            Some(_) => {
                tracks.remove(&track);
                Err(PlayerError::UnknownTrack(track))
            }
            None => Err(PlayerError::UnknownTrack(track)),
        }
    }

    fn send(&self, command: EngineCommand) -> PlayerResult<()> {
        self.ensure_open()?;
        // a rejected command drops here; owned graphs still defer their teardown
        self.shared.commands.push(command).map_err(|_| PlayerError::QueueFull)
    }

    fn build(&self, source: PlaySource, looping: bool) -> PlayerResult<Graph> {
        let mut graph = match source {
            PlaySource::Path(path) => return self.file_graph(&path, looping),
            PlaySource::Class(class) => class.instantiate()?,
            PlaySource::Graph(graph) => graph,
        };
        if looping {
            log::warn!("Looping applies to resource paths; '{}' plays once", graph.name());
        }
        let found = match graph.output_format() {
            Some(format) if graph.is_prepared() => format,
            _ => self.prepare(&mut graph)?,
        };
        self.check_format(found)?;
        Ok(graph)
    }

    /// File source graph, adapted to the player format when it differs
    fn file_graph(&self, path: &str, looping: bool) -> PlayerResult<Graph> {
        let target = self.shared.format;
        let loops = if looping { 0 } else { 1 };
        let source = || {
            FileSource::new("source", "source", path)
                .with_loops(loops)
                .with_sample_type(target.sample_type)
        };

        let mut graph = Graph::new(path, path);
        let node = graph.add(source());
        graph.set_output(node, "out")?;
        let native = self.prepare(&mut graph)?;
        if native == target {
            return Ok(graph);
        }
        // the native-format graph closes its resource when dropped
        drop(graph);

        let mut graph = Graph::new(path, path);
        let mut last = graph.add(source());
        if native.channel_count != target.channel_count {
            if native.channel_count != 1 || target.channel_count != 2 {
                return Err(PlayerError::FormatMismatch {
                    expected: target,
                    found: native,
                });
            }
            let maker = graph.add(StereoMaker::new("stereo", "stereo", MakerChannel::Both));
            graph.connect(last, maker)?;
            last = maker;
        }
        if native.sample_rate != target.sample_rate {
            let resampler = graph.add(Resampler::new("resample", "resample", target.sample_rate));
            graph.connect(last, resampler)?;
            last = resampler;
        }
        graph.set_output(last, "out")?;
        let found = self.prepare(&mut graph)?;
        self.check_format(found)?;
        log::debug!("Adapted '{}' from {} to {}", path, native, target);
        Ok(graph)
    }

    fn prepare(&self, graph: &mut Graph) -> PlayerResult<Format> {
        let format = graph.prepare_with(
            self.shared.period_frames,
            self.shared.loader.as_ref(),
            self.shared.io_strategy,
        )?;
        Ok(format)
    }

    fn check_format(&self, found: Format) -> PlayerResult<()> {
        if found != self.shared.format {
            return Err(PlayerError::FormatMismatch {
                expected: self.shared.format,
                found,
            });
        }
        Ok(())
    }
}

/// Engine and ring for host-pumped rendering
struct Pump {
    engine: PlaybackEngine,
    writer: RingWriter,
}

struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn spawn(mut engine: PlaybackEngine, mut writer: RingWriter, idle: Duration) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name("audio-player".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    if !writer.write_with(|buffer| engine.render(buffer)) {
                        thread::park_timeout(idle);
                    }
                }
            })?;
        Ok(Self { stop, thread })
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Release);
        self.thread.thread().unpark();
        if self.thread.join().is_err() {
            log::error!("Audio player thread panicked");
        }
    }
}

/// An audio output with its playback engine
///
/// Dropping the player closes the device, stops the playback thread and
/// runs every outstanding teardown.
pub struct Player {
    handle: PlayerHandle,
    device: Box<dyn AudioDevice>,
    info: DeviceInfo,
    threading: Threading,
    pump: Option<Pump>,
    worker: Option<Worker>,
    reclaimer: Reclaimer,
}

impl Player {
    /// Open `device` and start playback; device failures are fatal
    pub fn new(
        config: PlayerConfig,
        mut device: Box<dyn AudioDevice>,
        loader: Arc<dyn ResourceLoader>,
    ) -> PlayerResult<Self> {
        let reclaimer = match config.threading {
            Threading::HostPumped => Reclaimer::inline(),
            _ => Reclaimer::spawn(Duration::from_millis(config.reclaim_interval_ms.max(1)))
                .map_err(|source| PlayerError::Spawn { what: "audio-gc", source })?,
        };

        let commands = Arc::new(MessageQueue::new(config.queue, config.command_capacity));
        let events = Arc::new(MessageQueue::new(config.queue, config.event_capacity));
        let ring = match config.threading {
            Threading::DeviceCallback => None,
            Threading::Dedicated | Threading::HostPumped => Some(period_ring(
                config.format,
                config.period_frames,
                config.ring_periods,
            )),
        };
        let stats = Arc::new(match &ring {
            Some((_, reader)) => EngineStats::with_underruns(reader.underrun_counter()),
            None => EngineStats::default(),
        });
        let engine = PlaybackEngine::new(
            config.format,
            config.period_frames,
            config.max_tracks,
            commands.clone(),
            events.clone(),
            stats.clone(),
        );

        let mut pump = None;
        let mut worker = None;
        let info = match ring {
            None => {
                let mut engine = engine;
                Self::open(device.as_mut(), &config, Box::new(move |buffer: &mut Buffer| engine.render(buffer)))?
            }
            Some((writer, mut reader)) => {
                let info = Self::open(
                    device.as_mut(),
                    &config,
                    Box::new(move |buffer: &mut Buffer| {
                        reader.read_into(buffer);
                    }),
                )?;
                if config.threading == Threading::Dedicated {
                    // poll a few times per period while the ring is full
                    let idle = Duration::from_secs_f64(
                        config.period_frames as f64 / config.format.sample_rate.max(1) as f64 / 4.0,
                    );
                    match Worker::spawn(engine, writer, idle) {
                        Ok(w) => worker = Some(w),
                        Err(source) => {
                            device.close();
                            return Err(PlayerError::Spawn {
                                what: "audio-player",
                                source,
                            });
                        }
                    }
                } else {
                    pump = Some(Pump { engine, writer });
                }
                info
            }
        };

        log::info!(
            "Player started on '{}': {}, {} frames ({:.1} ms), {:?}, {:?} queues",
            info.name,
            info.format,
            info.period_frames,
            info.latency_ms(),
            config.threading,
            config.queue
        );

        let shared = Shared {
            format: config.format,
            period_frames: config.period_frames,
            io_strategy: config.io_strategy,
            loader,
            commands,
            events,
            gc: reclaimer.handle(),
            next_id: AtomicU64::new(1),
            next_source: AtomicU64::new(1),
            tracks: Mutex::new(HashMap::new()),
            stats,
            closed: AtomicBool::new(false),
        };
        Ok(Self {
            handle: PlayerHandle {
                shared: Arc::new(shared),
            },
            device,
            info,
            threading: config.threading,
            pump,
            worker,
            reclaimer,
        })
    }

    /// Player on the default native output device
    #[cfg(feature = "cpal-backend")]
    pub fn with_default_output(config: PlayerConfig, loader: Arc<dyn ResourceLoader>) -> PlayerResult<Self> {
        let device = crate::audio::CpalDevice::new(config.output.clone());
        Self::new(config, Box::new(device), loader)
    }

    fn open(device: &mut dyn AudioDevice, config: &PlayerConfig, render: audio::RenderCallback) -> PlayerResult<DeviceInfo> {
        let what = format!("Opening device '{}'", device.name());
        let info = audio::checked(&what, device.open(config.format, config.period_frames, render))?;
        Ok(info)
    }

    /// Thread-safe handle for other threads
    pub fn handle(&self) -> PlayerHandle {
        self.handle.clone()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn threading(&self) -> Threading {
        self.threading
    }

    /// Render one period (host-pumped mode) and run deferred teardown
    ///
    /// Returns the frames rendered; 0 when the ring is full or the engine
    /// renders on its own.
    pub fn pump_once(&mut self) -> usize {
        let rendered = match &mut self.pump {
            Some(pump) => {
                let frames = pump.writer.period_frames();
                let engine = &mut pump.engine;
                if pump.writer.write_with(|buffer| engine.render(buffer)) {
                    frames
                } else {
                    0
                }
            }
            None => 0,
        };
        self.reclaimer.collect();
        rendered
    }

    pub fn play(&self, source: impl Into<PlaySource>, options: PlayOptions) -> PlayerResult<TrackId> {
        self.handle.play(source, options)
    }

    pub fn pause(&self, track: TrackId) -> PlayerResult<()> {
        self.handle.pause(track)
    }

    pub fn resume(&self, track: TrackId) -> PlayerResult<()> {
        self.handle.resume(track)
    }

    pub fn cancel(&self, track: TrackId) -> PlayerResult<()> {
        self.handle.cancel(track)
    }

    pub fn set_gain(&self, track: TrackId, gain: f32) -> PlayerResult<()> {
        self.handle.set_gain(track, gain)
    }

    pub fn set_param(&self, track: TrackId, element: &str, param: ElementParam) -> PlayerResult<()> {
        self.handle.set_param(track, element, param)
    }

    pub fn enqueue(&self, track: TrackId, queue: &str, desc: &ElementDesc) -> PlayerResult<SourceId> {
        self.handle.enqueue(track, queue, desc)
    }

    pub fn remove_source(&self, track: TrackId, queue: &str, source: SourceId) -> PlayerResult<()> {
        self.handle.remove_source(track, queue, source)
    }

    pub fn pause_source(&self, track: TrackId, queue: &str, source: SourceId, paused: bool) -> PlayerResult<()> {
        self.handle.pause_source(track, queue, source, paused)
    }

    pub fn clear_queue(&self, track: TrackId, queue: &str) -> PlayerResult<()> {
        self.handle.clear_queue(track, queue)
    }

    pub fn pause_input(&self, track: TrackId, mixer: &str, port: usize, paused: bool) -> PlayerResult<()> {
        self.handle.pause_input(track, mixer, port, paused)
    }

    pub fn ask_progress(&self, track: TrackId) -> PlayerResult<()> {
        self.handle.ask_progress(track)
    }

    pub fn get_event(&self) -> Option<PlayerEvent> {
        self.handle.get_event()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.handle.stats()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let shared = &self.handle.shared;
        shared.closed.store(true, Ordering::Release);
        self.device.close();
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        self.pump = None;
        // commands nobody will apply still own graphs
        while shared.commands.pop().is_some() {}
        self.reclaimer.shutdown();
        log::info!("Player stopped ({} pulls)", shared.stats.snapshot().pulls);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ManualDevice, ManualPull};
    use crate::element::{
        Element, ElementBase, ElementNotice, ElementResult, ProcessContext, SineSource, Status,
        ZeroSource,
    };
    use crate::engine::{QueueKind, TrackError};
    use crate::loader::{MemoryLoader, NoResources};
    use crate::types::{Buffer, SampleType};
    use std::sync::atomic::AtomicUsize;

    fn mono() -> Format {
        Format::new(SampleType::Int16, 8000, 1)
    }

    fn config(format: Format, period: usize, threading: Threading) -> PlayerConfig {
        PlayerConfig::default()
            .with_format(format)
            .with_period_frames(period)
            .with_threading(threading)
    }

    fn manual(config: PlayerConfig, loader: Arc<dyn ResourceLoader>) -> (Player, ManualPull) {
        let (device, pull) = ManualDevice::new();
        let player = Player::new(config, Box::new(device), loader).unwrap();
        (player, pull)
    }

    fn sine_graph(format: Format, duration_ms: u32) -> Graph {
        let mut graph = Graph::new("tone", "tone");
        let sine = graph.add(SineSource::new("sine", "sine", format, 440.0, duration_ms));
        graph.set_output(sine, "out").unwrap();
        graph
    }

    fn drain(player: &Player) -> Vec<PlayerEvent> {
        std::iter::from_fn(|| player.get_event()).collect()
    }

    #[test]
    fn test_two_half_gain_sines_equal_one_sine() {
        let cfg = config(mono(), 128, Threading::DeviceCallback);
        let (halves, halves_pull) = manual(cfg.clone(), Arc::new(NoResources));
        let (single, single_pull) = manual(cfg, Arc::new(NoResources));
        for _ in 0..2 {
            halves
                .play(sine_graph(mono(), 1000), PlayOptions::default().with_gain(0.5))
                .unwrap();
        }
        single.play(sine_graph(mono(), 1000), PlayOptions::default()).unwrap();

        for _ in 0..8 {
            let a = halves_pull.pull().unwrap();
            let b = single_pull.pull().unwrap();
            for (x, y) in a.samples::<i16>().unwrap().iter().zip(b.samples::<i16>().unwrap()) {
                assert!((*x as i32 - *y as i32).abs() <= 1, "{x} vs {y}");
            }
        }
        assert_eq!(halves.stats().clipped_samples, 0);
    }

    #[test]
    fn test_pause_gives_silence_then_exact_continuation() {
        let cfg = config(mono(), 64, Threading::DeviceCallback);
        let (player, pull) = manual(cfg.clone(), Arc::new(NoResources));
        let (reference, reference_pull) = manual(cfg, Arc::new(NoResources));
        let track = player.play(sine_graph(mono(), 1000), PlayOptions::default()).unwrap();
        reference.play(sine_graph(mono(), 1000), PlayOptions::default()).unwrap();

        let before = pull.pull().unwrap();
        assert_eq!(before, reference_pull.pull().unwrap());

        player.pause(track).unwrap();
        player.pause(track).unwrap();
        for _ in 0..3 {
            assert!(pull.pull().unwrap().is_silent());
        }
        player.resume(track).unwrap();
        for _ in 0..4 {
            assert_eq!(pull.pull().unwrap(), reference_pull.pull().unwrap());
        }
    }

    struct Counting {
        base: ElementBase,
        calls: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl Element for Counting {
        fn base(&self) -> &ElementBase {
            &self.base
        }
        fn kind(&self) -> &'static str {
            "Counting"
        }
        fn prepare(&mut self, _ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
            Ok(vec![mono()])
        }
        fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let frames = ctx.frames();
            ctx.output(0).silence(frames);
            Ok(Status::More)
        }
        fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_stops_processing_and_shuts_down_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new("counting", "counting");
        let node = graph.add(Counting {
            base: ElementBase::new("c", "counting").with_output("out"),
            calls: calls.clone(),
            shutdowns: shutdowns.clone(),
        });
        graph.set_output(node, "out").unwrap();

        let (mut player, pull) = manual(config(mono(), 32, Threading::HostPumped), Arc::new(NoResources));
        let track = player.play(graph, PlayOptions::default()).unwrap();
        for _ in 0..3 {
            assert_eq!(player.pump_once(), 32);
            pull.pull().unwrap();
        }
        assert!(calls.load(Ordering::SeqCst) >= 3);

        player.cancel(track).unwrap();
        player.pump_once();
        let after_cancel = calls.load(Ordering::SeqCst);
        for _ in 0..3 {
            pull.pull().unwrap();
            player.pump_once();
        }
        assert_eq!(calls.load(Ordering::SeqCst), after_cancel);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

        let events = drain(&player);
        assert!(matches!(events.first(), Some(PlayerEvent::TrackStarted(t)) if *t == track));
        assert!(events.iter().any(|e| matches!(e, PlayerEvent::TrackCancelled(t) if *t == track)));
        assert!(matches!(player.pause(track), Err(PlayerError::UnknownTrack(_))));

        drop(player);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_two_second_sine_finishes_on_pull_87() {
        let format = Format::stereo_i16(44100);
        let (player, pull) = manual(config(format, 1024, Threading::DeviceCallback), Arc::new(NoResources));
        let class = GraphClass::new("sine-test", "sine-test").then(
            ElementDesc::new("sine", "SineSource")
                .arg("format", format)
                .arg("frequency", 440.0)
                .arg("duration_ms", 2000u32),
        );
        let track = player.play(class, PlayOptions::default()).unwrap();

        let mut finished_on = None;
        let mut frames = 0;
        for n in 1..=100 {
            let out = pull.pull().unwrap();
            if finished_on.is_none() {
                frames += out.frame_count();
            }
            for event in drain(&player) {
                if matches!(event, PlayerEvent::TrackFinished(t) if t == track) {
                    finished_on = Some(n);
                }
            }
            if finished_on.is_some() {
                break;
            }
        }
        assert_eq!(finished_on, Some(88200usize.div_ceil(1024)));
        assert_eq!(frames, 87 * 1024);
        assert_eq!(player.stats().clipped_samples, 0);
        assert_eq!(player.handle().live_tracks(), 0);
    }

    #[test]
    fn test_full_command_queue_is_reported() {
        let cfg = config(mono(), 64, Threading::HostPumped).with_command_capacity(2);
        let (player, _pull) = manual(cfg, Arc::new(NoResources));
        let zero = || {
            let mut graph = Graph::new("z", "z");
            let node = graph.add(ZeroSource::new("z", "zero", mono(), 100));
            graph.set_output(node, "out").unwrap();
            graph
        };
        player.play(zero(), PlayOptions::default()).unwrap();
        player.play(zero(), PlayOptions::default()).unwrap();
        assert!(matches!(
            player.play(zero(), PlayOptions::default()),
            Err(PlayerError::QueueFull)
        ));
        assert_eq!(player.handle().live_tracks(), 2);
    }

    #[test]
    fn test_missing_resource_fails_play() {
        let (player, _pull) = manual(
            config(mono(), 64, Threading::DeviceCallback),
            Arc::new(MemoryLoader::new()),
        );
        let err = player.play("sfx/missing.wav", PlayOptions::default()).unwrap_err();
        assert!(err.is_resource_not_found(), "{err}");
        assert_eq!(player.handle().live_tracks(), 0);
    }

    #[test]
    fn test_mismatched_graph_is_rejected() {
        let (player, _pull) = manual(config(mono(), 64, Threading::DeviceCallback), Arc::new(NoResources));
        let other = Format::new(SampleType::Float32, 8000, 1);
        assert!(matches!(
            player.play(sine_graph(other, 100), PlayOptions::default()),
            Err(PlayerError::FormatMismatch { .. })
        ));
    }

    fn wav_bytes(sample_rate: u32, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let t = i as f32 / sample_rate as f32;
                let s = (t * 440.0 * std::f32::consts::TAU).sin() * 12000.0;
                writer.write_sample(s as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_path_is_adapted_to_player_format() {
        let loader = Arc::new(MemoryLoader::new());
        loader.insert("sfx/tone.wav", wav_bytes(22050, 2205));
        let format = Format::stereo_i16(44100);
        let (player, pull) = manual(config(format, 512, Threading::DeviceCallback), loader);

        let track = player.play("sfx/tone.wav", PlayOptions::default()).unwrap();
        let mut heard = false;
        let mut finished = false;
        for _ in 0..40 {
            let out = pull.pull().unwrap();
            let samples = out.samples::<i16>().unwrap();
            for frame in samples.chunks(2) {
                assert_eq!(frame[0], frame[1]);
            }
            heard |= out.peak() > 0.1;
            finished |= drain(&player)
                .iter()
                .any(|e| matches!(e, PlayerEvent::TrackFinished(t) if *t == track));
            if finished {
                break;
            }
        }
        assert!(heard);
        assert!(finished);
    }

    #[test]
    fn test_queue_and_params_by_name() {
        let format = mono();
        let class = GraphClass::new("bus", "bus")
            .then(
                ElementDesc::new("queue", "Queue")
                    .arg("format", format)
                    .arg("keep_open", true),
            )
            .then(ElementDesc::new("gain", "Gain").arg("gain", 1.0));
        let (player, pull) = manual(config(format, 64, Threading::DeviceCallback), Arc::new(NoResources));
        let track = player.play(class, PlayOptions::default()).unwrap();
        assert!(pull.pull().unwrap().is_silent());

        let beep = ElementDesc::new("beep", "SineSource")
            .arg("format", format)
            .arg("duration_ms", 20u32);
        player.enqueue(track, "queue", &beep).unwrap();
        player.set_param(track, "gain", ElementParam::Gain(0.5)).unwrap();
        assert!(!pull.pull().unwrap().is_silent());

        assert!(matches!(
            player.enqueue(track, "gain", &beep),
            Err(PlayerError::NotAQueue { .. })
        ));
        assert!(matches!(
            player.set_param(track, "nope", ElementParam::Gain(1.0)),
            Err(PlayerError::UnknownElement { .. })
        ));
        let wrong = ElementDesc::new("hiss", "ZeroSource").arg("format", Format::stereo_i16(8000));
        assert!(matches!(
            player.enqueue(track, "queue", &wrong),
            Err(PlayerError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_failing_track_leaves_others_playing() {
        struct Broken {
            base: ElementBase,
        }
        impl Element for Broken {
            fn base(&self) -> &ElementBase {
                &self.base
            }
            fn kind(&self) -> &'static str {
                "Broken"
            }
            fn prepare(&mut self, _ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
                Ok(vec![mono()])
            }
            fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
                Err(ElementError::Proxy("stream broke"))
            }
        }

        let cfg = config(mono(), 64, Threading::DeviceCallback);
        let (player, pull) = manual(cfg.clone(), Arc::new(NoResources));
        let (reference, reference_pull) = manual(cfg, Arc::new(NoResources));
        let mut broken = Graph::new("broken", "broken");
        let node = broken.add(Broken {
            base: ElementBase::new("b", "broken").with_output("out"),
        });
        broken.set_output(node, "out").unwrap();

        let good = player.play(sine_graph(mono(), 1000), PlayOptions::default()).unwrap();
        let bad = player.play(broken, PlayOptions::default()).unwrap();
        reference.play(sine_graph(mono(), 1000), PlayOptions::default()).unwrap();

        for _ in 0..3 {
            assert_eq!(pull.pull().unwrap(), reference_pull.pull().unwrap());
        }
        let events = drain(&player);
        assert!(events.iter().any(|e| matches!(
            e,
            PlayerEvent::Error { track, reason: TrackError::Element(_) } if *track == bad
        )));
        assert!(player.ask_progress(good).is_ok());
        assert!(matches!(player.cancel(bad), Err(PlayerError::UnknownTrack(_))));
    }

    #[test]
    fn test_dedicated_thread_renders_ahead() {
        let cfg = config(mono(), 64, Threading::Dedicated).with_queue(QueueKind::Locked);
        let (player, pull) = manual(cfg, Arc::new(NoResources));
        player.play(sine_graph(mono(), 5000), PlayOptions::default()).unwrap();

        let mut heard = false;
        for _ in 0..500 {
            let out: Buffer = pull.pull().unwrap();
            if out.peak() > 0.0 {
                heard = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(heard);
        assert!(player.stats().pulls > 0);
        assert!(matches!(player.get_event(), Some(PlayerEvent::TrackStarted(_))));
    }

    #[test]
    fn test_dropped_terminal_events_do_not_leak_tracks() {
        let cfg = config(mono(), 64, Threading::HostPumped).with_event_capacity(1);
        let (mut player, pull) = manual(cfg, Arc::new(NoResources));
        // 5ms at 8kHz ends inside the first period
        let a = player.play(sine_graph(mono(), 5), PlayOptions::default()).unwrap();
        let b = player.play(sine_graph(mono(), 5), PlayOptions::default()).unwrap();
        for _ in 0..4 {
            player.pump_once();
            pull.pull().unwrap();
        }
        let events = drain(&player);
        assert!(events.iter().all(|e| !e.is_terminal()), "{events:?}");

        assert_eq!(player.handle().live_tracks(), 0);
        assert!(matches!(player.pause(a), Err(PlayerError::UnknownTrack(_))));
        assert!(matches!(player.set_gain(b, 0.5), Err(PlayerError::UnknownTrack(_))));
        assert!(player.stats().dropped_events > 0);
    }

    #[test]
    fn test_ring_underruns_reach_stats() {
        let (mut player, pull) = manual(config(mono(), 64, Threading::HostPumped), Arc::new(NoResources));
        pull.pull().unwrap();
        pull.pull().unwrap();
        assert_eq!(player.stats().underruns, 2);
        player.pump_once();
        pull.pull().unwrap();
        assert_eq!(player.stats().underruns, 2);
    }

    #[test]
    fn test_queued_sources_report_and_obey_commands() {
        let format = mono();
        let class = GraphClass::new("bus", "bus")
            .then(
                ElementDesc::new("queue", "Queue")
                    .arg("format", format)
                    .arg("keep_open", true),
            )
            .then(ElementDesc::new("gain", "Gain").arg("gain", 1.0));
        let (player, pull) = manual(config(format, 64, Threading::DeviceCallback), Arc::new(NoResources));
        let track = player.play(class, PlayOptions::default()).unwrap();
        let tone = |ms: u32| {
            ElementDesc::new("tone", "SineSource")
                .arg("format", format)
                .arg("duration_ms", ms)
        };
        // 20ms is 160 frames, done during the third pull
        let short = player.enqueue(track, "queue", &tone(20)).unwrap();
        let long = player.enqueue(track, "queue", &tone(1000)).unwrap();
        assert_ne!(short, long);
        for _ in 0..4 {
            assert!(!pull.pull().unwrap().is_silent());
        }
        let events = drain(&player);
        assert!(events.iter().any(|e| matches!(
            e,
            PlayerEvent::ElementEvent { track: t, kind: ElementNotice::SourceDone(s), .. }
                if *t == track && *s == short
        )));

        player.pause_source(track, "queue", long, true).unwrap();
        assert!(pull.pull().unwrap().is_silent());
        player.pause_source(track, "queue", long, false).unwrap();
        assert!(!pull.pull().unwrap().is_silent());

        player.remove_source(track, "queue", long).unwrap();
        assert!(pull.pull().unwrap().is_silent());
        // the second removal is refused on the audio side, the track plays on
        player.remove_source(track, "queue", long).unwrap();
        pull.pull().unwrap();
        let events = drain(&player);
        assert!(events.iter().any(|e| matches!(
            e,
            PlayerEvent::ParamRejected { param: "remove-source", .. }
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, PlayerEvent::ElementEvent { .. } | PlayerEvent::TrackFinished(_))));

        assert!(matches!(
            player.pause_source(track, "gain", long, true),
            Err(PlayerError::NotAQueue { .. })
        ));
        player.clear_queue(track, "queue").unwrap();
        assert_eq!(player.handle().live_tracks(), 1);
    }

    #[test]
    fn test_closed_player_rejects_handles() {
        let (player, _pull) = manual(config(mono(), 64, Threading::HostPumped), Arc::new(NoResources));
        let handle = player.handle();
        drop(player);
        assert!(matches!(
            handle.play(sine_graph(mono(), 100), PlayOptions::default()),
            Err(PlayerError::Closed)
        ));
    }
}
