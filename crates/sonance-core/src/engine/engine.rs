//! Playback engine - the audio-side half of the player
//!
//! Owns every live track and mixes them into the device buffer. One
//! [`PlaybackEngine::render`] call is one pull:
//!
//! 1. drain pending commands without blocking
//! 2. render each playing track's graph into a shared scratch buffer
//! 3. accumulate it with the track gain on a float mix bus
//! 4. convert the bus into the output once, saturating and counting clips
//! 5. drop retired tracks (their teardown is deferred by `Owned`)
//!
//! Everything the render touches is allocated in [`PlaybackEngine::new`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::types::{Buffer, Format, SampleType};

use super::command::{EngineCommand, PlayerEvent, TrackError, TrackId};
use super::queue::MessageQueue;
use super::track::{Rendered, Track};

/// Tracks mixed at once unless configured otherwise
pub const DEFAULT_MAX_TRACKS: usize = 32;

/// Counters shared between the engine and its player
#[derive(Debug, Default)]
pub struct EngineStats {
    pulls: AtomicU64,
    /// Bumped by whoever hands periods to the device, not by the engine
    underruns: Arc<AtomicU64>,
    clipped_samples: AtomicU64,
    dropped_events: AtomicU64,
    active_tracks: AtomicUsize,
}

impl EngineStats {
    /// Stats whose underrun count is read from an existing counter
    pub fn with_underruns(underruns: Arc<AtomicU64>) -> Self {
        Self {
            underruns,
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pulls: self.pulls.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            clipped_samples: self.clipped_samples.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            active_tracks: self.active_tracks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Render calls made by the device or playback thread
    pub pulls: u64,
    /// Device reads that found no rendered period waiting
    pub underruns: u64,
    /// Samples that saturated while mixing tracks
    pub clipped_samples: u64,
    /// Events lost because the event queue was full
    pub dropped_events: u64,
    pub active_tracks: usize,
}

/// Mixes the active tracks; lives on the audio thread
pub struct PlaybackEngine {
    format: Format,
    period_frames: usize,
    commands: Arc<MessageQueue<EngineCommand>>,
    events: Arc<MessageQueue<PlayerEvent>>,
    tracks: Vec<Track>,
    max_tracks: usize,
    /// Pre-allocated render target shared by every track
    scratch: Buffer,
    /// Float accumulator for one window, so saturation is decided once
    mix: Buffer,
    stats: Arc<EngineStats>,
}

impl PlaybackEngine {
    pub fn new(
        format: Format,
        period_frames: usize,
        max_tracks: usize,
        commands: Arc<MessageQueue<EngineCommand>>,
        events: Arc<MessageQueue<PlayerEvent>>,
        stats: Arc<EngineStats>,
    ) -> Self {
        let period_frames = period_frames.max(1);
        let max_tracks = max_tracks.max(1);
        Self {
            format,
            period_frames,
            commands,
            events,
            tracks: Vec::with_capacity(max_tracks),
            max_tracks,
            scratch: Buffer::with_capacity(format, period_frames),
            mix: Buffer::with_capacity(format.with_sample_type(SampleType::Float32), period_frames),
            stats,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn period_frames(&self) -> usize {
        self.period_frames
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Render `out.frame_count()` frames of the mix into `out`
    ///
    /// Requests longer than one period are rendered period by period.
    pub fn render(&mut self, out: &mut Buffer) {
        let frames = out.frame_count();
        out.silence(frames);
        self.apply_commands();

        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(self.period_frames);
            self.render_window(out, offset, n);
            offset += n;
        }

        // dropping a track only queues its graph for the collector
        self.tracks.retain(|track| !track.is_retired());
        self.stats.pulls.fetch_add(1, Ordering::Relaxed);
        self.stats.active_tracks.store(self.tracks.len(), Ordering::Relaxed);
    }

    fn render_window(&mut self, out: &mut Buffer, offset: usize, frames: usize) {
        let Self {
            tracks,
            scratch,
            mix,
            events,
            stats,
            ..
        } = self;
        let events: &MessageQueue<PlayerEvent> = events;
        let stats: &EngineStats = stats;

        mix.silence(frames);
        for track in tracks.iter_mut() {
            scratch.clear();
            let id = track.id();
            match track.render(scratch, frames) {
                Ok(Rendered::Idle) => {}
                Ok(Rendered::Frames { offset: at, first, done }) => {
                    if first {
                        emit(events, stats, PlayerEvent::TrackStarted(id));
                    }
                    mix.accumulate(at, scratch, track.gain());
                    track.graph_mut().drain_notices(|element, kind| {
                        emit(events, stats, PlayerEvent::ElementEvent { track: id, element, kind });
                    });
                    if done {
                        emit(events, stats, PlayerEvent::TrackFinished(id));
                    }
                }
                Err(e) => {
                    track.fail();
                    emit(
                        events,
                        stats,
                        PlayerEvent::Error {
                            track: id,
                            reason: TrackError::Element(e),
                        },
                    );
                }
            }
        }

        let clipped = out.store_frames(offset, mix, frames);
        if clipped > 0 {
            stats.clipped_samples.fetch_add(clipped as u64, Ordering::Relaxed);
        }
    }

    fn apply_commands(&mut self) {
        // bounded so a flooding producer cannot hold up the render
        for _ in 0..self.commands.capacity() {
            let Some(command) = self.commands.try_pop() else {
                break;
            };
            self.apply(command);
        }
    }

    fn apply(&mut self, command: EngineCommand) {
        let Self {
            tracks,
            max_tracks,
            events,
            stats,
            ..
        } = self;
        let id = command.track();
        let track = tracks.iter_mut().find(|t| t.id() == id);

        match command {
            EngineCommand::Play {
                track: id,
                graph,
                status,
                gain,
                delay_frames,
            } => {
                if track.is_some() {
                    return;
                }
                if tracks.len() >= *max_tracks {
                    status.retire();
                    drop(graph);
                    emit(
                        events,
                        stats,
                        PlayerEvent::Error {
                            track: id,
                            reason: TrackError::TooManyTracks,
                        },
                    );
                    return;
                }
                tracks.push(Track::new(id, graph, status, gain, delay_frames));
            }
            EngineCommand::Pause(_) => {
                if let Some(track) = track {
                    track.pause();
                }
            }
            EngineCommand::Resume(_) => {
                if let Some(track) = track {
                    track.resume();
                }
            }
            EngineCommand::Cancel(id) => {
                if let Some(track) = track {
                    if track.cancel() {
                        emit(events, stats, PlayerEvent::TrackCancelled(id));
                    }
                }
            }
            EngineCommand::SetGain { gain, .. } => {
                if let Some(track) = track {
                    track.set_gain(gain);
                }
            }
            EngineCommand::SetParam { element, param, .. } => {
                if let Some(track) = track {
                    if track.graph_mut().set_element_param(element, param).is_err() {
                        emit(
                            events,
                            stats,
                            PlayerEvent::ParamRejected {
                                track: id,
                                element,
                                param: param.name(),
                            },
                        );
                    }
                }
            }
            EngineCommand::Enqueue {
                element,
                id: source_id,
                source,
                ..
            } => {
                let refused = match track {
                    Some(track) => track.graph_mut().enqueue_into(element, source_id, source).err(),
                    None => Some(source),
                };
                if let Some(source) = refused {
                    drop(source);
                    emit(
                        events,
                        stats,
                        PlayerEvent::EnqueueRejected {
                            track: id,
                            element,
                            source: source_id,
                        },
                    );
                }
            }
            EngineCommand::AskProgress(id) => {
                if let Some(track) = track {
                    let frames = track.frames_played();
                    emit(events, stats, PlayerEvent::TrackProgress { track: id, frames });
                }
            }
        }
    }

    /// Look up a live track
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }
}

fn emit(events: &MessageQueue<PlayerEvent>, stats: &EngineStats, event: PlayerEvent) {
    if events.try_push(event).is_err() {
        stats.dropped_events.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{
        Element, ElementBase, ElementNotice, ElementParam, ElementResult, Fade, FadeDirection,
        PrepareContext, ProcessContext, SineSource, Status, ZeroSource,
    };
    use crate::engine::queue::QueueKind;
    use crate::engine::track::TrackStatus;
    use crate::graph::Graph;
    use crate::loader::{IoStrategy, NoResources};
    use crate::types::SampleType;

    const PERIOD: usize = 64;

    fn mono() -> Format {
        Format::new(SampleType::Int16, 8000, 1)
    }

    // field order drops the engine before the collector
    struct Fixture {
        engine: PlaybackEngine,
        commands: Arc<MessageQueue<EngineCommand>>,
        events: Arc<MessageQueue<PlayerEvent>>,
        stats: Arc<EngineStats>,
        gc: basedrop::Collector,
    }

    impl Fixture {
        fn new(max_tracks: usize) -> Self {
            Self::with_queues(QueueKind::LockFree, max_tracks, 64)
        }

        fn with_queues(kind: QueueKind, max_tracks: usize, event_capacity: usize) -> Self {
            let commands = Arc::new(MessageQueue::new(kind, 64));
            let events = Arc::new(MessageQueue::new(kind, event_capacity));
            let stats = Arc::new(EngineStats::default());
            Self {
                engine: PlaybackEngine::new(
                    mono(),
                    PERIOD,
                    max_tracks,
                    commands.clone(),
                    events.clone(),
                    stats.clone(),
                ),
                commands,
                events,
                stats,
                gc: basedrop::Collector::new(),
            }
        }

        fn play(
            &self,
            id: u64,
            element: impl Element + 'static,
            gain: f32,
            delay_frames: u64,
        ) -> basedrop::Shared<TrackStatus> {
            let mut graph = Graph::new(format!("g{id}"), format!("g{id}"));
            let node = graph.add(element);
            graph.set_output(node, "out").unwrap();
            self.play_graph(id, graph, gain, delay_frames)
        }

        fn play_graph(
            &self,
            id: u64,
            mut graph: Graph,
            gain: f32,
            delay_frames: u64,
        ) -> basedrop::Shared<TrackStatus> {
            graph.prepare_with(PERIOD, &NoResources, IoStrategy::Stream).unwrap();
            let status = basedrop::Shared::new(&self.gc.handle(), TrackStatus::default());
            self.commands
                .push(EngineCommand::Play {
                    track: TrackId(id),
                    graph: basedrop::Owned::new(&self.gc.handle(), graph),
                    status: status.clone(),
                    gain,
                    delay_frames,
                })
                .unwrap();
            status
        }

        fn pull(&mut self, frames: usize) -> Buffer {
            let mut out = Buffer::with_capacity(mono(), frames);
            out.set_frame_count(frames);
            self.engine.render(&mut out);
            out
        }

        fn events(&self) -> Vec<PlayerEvent> {
            std::iter::from_fn(|| self.events.pop()).collect()
        }
    }

    fn sine(name: &str) -> SineSource {
        SineSource::new(name, name, mono(), 440.0, 1000)
    }

    struct Failing {
        base: ElementBase,
    }

    impl Element for Failing {
        fn base(&self) -> &ElementBase {
            &self.base
        }
        fn kind(&self) -> &'static str {
            "Failing"
        }
        fn prepare(&mut self, _ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
            Ok(vec![mono()])
        }
        fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
            Err(self.base.unsupported(&ElementParam::Gain(0.0)))
        }
    }

    #[test]
    fn test_zero_tracks_mix_to_silence() {
        let mut f = Fixture::new(8);
        for id in 0..5 {
            f.play(id, ZeroSource::new("z", "zero", mono(), 1000), 1.0, 0);
        }
        let out = f.pull(PERIOD);
        assert_eq!(out.frame_count(), PERIOD);
        assert!(out.is_silent());
        assert_eq!(f.engine.active_tracks(), 5);
        let started = f
            .events()
            .iter()
            .filter(|e| matches!(e, PlayerEvent::TrackStarted(_)))
            .count();
        assert_eq!(started, 5);
    }

    #[test]
    fn test_delay_is_sample_accurate() {
        let mut f = Fixture::new(4);
        f.play(1, sine("a"), 1.0, 10);
        let delayed = f.pull(PERIOD);
        let delayed = delayed.samples::<i16>().unwrap().to_vec();

        let mut reference = Fixture::new(4);
        reference.play(1, sine("a"), 1.0, 0);
        let direct = reference.pull(PERIOD);
        let direct = direct.samples::<i16>().unwrap();

        assert!(delayed[..10].iter().all(|&s| s == 0));
        assert_eq!(&delayed[10..], &direct[..PERIOD - 10]);
    }

    #[test]
    fn test_failing_track_is_isolated() {
        let mut f = Fixture::new(4);
        f.play(1, sine("a"), 1.0, 0);
        f.play(
            2,
            Failing {
                base: ElementBase::new("x", "failing").with_output("out"),
            },
            1.0,
            0,
        );
        let mixed = f.pull(PERIOD);

        let mut reference = Fixture::new(4);
        reference.play(1, sine("a"), 1.0, 0);
        assert_eq!(mixed, reference.pull(PERIOD));

        let events = f.events();
        assert!(events.iter().any(|e| matches!(
            e,
            PlayerEvent::Error {
                track: TrackId(2),
                reason: TrackError::Element(_)
            }
        )));
        assert_eq!(f.engine.active_tracks(), 1);
        assert!(f.engine.track(TrackId(1)).is_some());
    }

    #[test]
    fn test_too_many_tracks() {
        let mut f = Fixture::new(1);
        let first = f.play(1, sine("a"), 1.0, 0);
        let refused = f.play(2, sine("b"), 1.0, 0);
        f.pull(PERIOD);
        assert!(!first.is_retired());
        assert!(refused.is_retired());
        let events = f.events();
        assert!(events.iter().any(|e| matches!(
            e,
            PlayerEvent::Error {
                track: TrackId(2),
                reason: TrackError::TooManyTracks
            }
        )));
        assert_eq!(f.engine.active_tracks(), 1);
    }

    #[test]
    fn test_long_request_is_split_into_periods() {
        let mut f = Fixture::new(2);
        f.play(1, sine("a"), 1.0, 0);
        let out = f.pull(PERIOD * 3 + 5);
        assert_eq!(out.frame_count(), PERIOD * 3 + 5);
        assert!(out.samples::<i16>().unwrap()[PERIOD * 3..].iter().any(|&s| s != 0));
        assert_eq!(f.stats.snapshot().pulls, 1);
    }

    #[test]
    fn test_commands_for_unknown_tracks_are_ignored() {
        let mut f = Fixture::new(2);
        for command in [
            EngineCommand::Pause(TrackId(9)),
            EngineCommand::Resume(TrackId(9)),
            EngineCommand::Cancel(TrackId(9)),
            EngineCommand::AskProgress(TrackId(9)),
        ] {
            f.commands.push(command).unwrap();
        }
        let out = f.pull(PERIOD);
        assert!(out.is_silent());
        assert!(f.events().is_empty());
    }

    #[test]
    fn test_rejected_param_keeps_track() {
        let mut f = Fixture::new(2);
        f.play(1, ZeroSource::new("z", "zero", mono(), 1000), 1.0, 0);
        f.commands
            .push(EngineCommand::SetParam {
                track: TrackId(1),
                element: 0,
                param: ElementParam::Frequency(100.0),
            })
            .unwrap();
        f.commands.push(EngineCommand::AskProgress(TrackId(1))).unwrap();
        f.pull(PERIOD);
        f.commands.push(EngineCommand::AskProgress(TrackId(1))).unwrap();
        f.pull(PERIOD);

        let events = f.events();
        assert!(events.iter().any(|e| matches!(
            e,
            PlayerEvent::ParamRejected {
                param: "frequency",
                ..
            }
        )));
        let progress: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::TrackProgress { frames, .. } => Some(*frames),
                _ => None,
            })
            .collect();
        // commands apply before the render of the same pull
        assert_eq!(progress, [0, PERIOD as u64]);
        assert_eq!(f.engine.active_tracks(), 1);
    }

    #[test]
    fn test_full_event_queue_counts_drops() {
        let mut f = Fixture::with_queues(QueueKind::Locked, 4, 1);
        for _ in 0..3 {
            f.commands.push(EngineCommand::AskProgress(TrackId(1))).unwrap();
        }
        f.play(2, ZeroSource::new("z", "zero", mono(), 1000), 1.0, 0);
        f.pull(PERIOD);
        // TrackStarted fits, nothing else was asked of a live track
        assert_eq!(f.events.len(), 1);
        assert_eq!(f.stats.snapshot().dropped_events, 0);
        for _ in 0..2 {
            f.commands.push(EngineCommand::AskProgress(TrackId(2))).unwrap();
        }
        f.pull(PERIOD);
        assert_eq!(f.stats.snapshot().dropped_events, 2);
    }

    #[test]
    fn test_retirement_survives_dropped_terminal_event() {
        let mut f = Fixture::with_queues(QueueKind::LockFree, 4, 1);
        // 5ms at 8kHz is 40 frames, well inside the first period
        let a = f.play(1, SineSource::new("a", "a", mono(), 440.0, 5), 0.5, 0);
        let b = f.play(2, SineSource::new("b", "b", mono(), 440.0, 5), 0.5, 0);
        for _ in 0..4 {
            f.pull(PERIOD);
        }
        assert_eq!(f.engine.active_tracks(), 0);
        assert!(a.is_retired());
        assert!(b.is_retired());
        // only the first TrackStarted made it through
        assert_eq!(f.events().len(), 1);
        assert_eq!(f.stats.snapshot().dropped_events, 3);
    }

    #[test]
    fn test_half_gain_sines_mix_without_clipping() {
        for kind in [QueueKind::LockFree, QueueKind::Locked] {
            let mut f = Fixture::with_queues(kind, 4, 64);
            f.play(1, sine("a"), 0.5, 0);
            f.play(2, sine("b"), 0.5, 0);
            let mixed = f.pull(PERIOD);

            let mut reference = Fixture::new(4);
            reference.play(1, sine("a"), 1.0, 0);
            let single = reference.pull(PERIOD);

            let mixed = mixed.samples::<i16>().unwrap();
            let single = single.samples::<i16>().unwrap();
            assert!(mixed.iter().zip(single).all(|(m, s)| (m - s).abs() <= 1), "{kind:?}");
            assert_eq!(f.stats.snapshot().clipped_samples, 0, "{kind:?}");
            assert_eq!(f.engine.active_tracks(), 2);
        }
    }

    #[test]
    fn test_clipping_is_counted_once_per_sample() {
        let mut f = Fixture::new(4);
        for id in 0..3 {
            f.play(id, SineSource::new("s", "s", mono(), 1000.0, 1000), 1.0, 0);
        }
        let out = f.pull(PERIOD);
        let clipped = f.stats.snapshot().clipped_samples as usize;
        let saturated = out
            .samples::<i16>()
            .unwrap()
            .iter()
            .filter(|&&s| s == i16::MAX || s == i16::MIN)
            .count();
        assert!(clipped > 0);
        assert!(clipped <= PERIOD);
        assert_eq!(clipped, saturated);
    }

    #[test]
    fn test_fade_completion_is_reported_before_finish() {
        let mut f = Fixture::new(2);
        let mut graph = Graph::new("g", "faded");
        let source = graph.add(SineSource::new("s", "sine", mono(), 440.0, 10));
        let fade = graph.add(Fade::new("f", "fade", FadeDirection::In, 0, 2));
        graph.connect(source, fade).unwrap();
        graph.set_output(fade, "out").unwrap();
        f.play_graph(1, graph, 1.0, 0);
        for _ in 0..3 {
            f.pull(PERIOD);
        }
        let events = f.events();
        let fade_at = events.iter().position(|e| {
            matches!(
                e,
                PlayerEvent::ElementEvent {
                    track: TrackId(1),
                    element: 1,
                    kind: ElementNotice::FadeDone(FadeDirection::In),
                }
            )
        });
        let finish_at = events
            .iter()
            .position(|e| matches!(e, PlayerEvent::TrackFinished(TrackId(1))));
        assert!(fade_at.unwrap() < finish_at.unwrap(), "{events:?}");
    }
}
