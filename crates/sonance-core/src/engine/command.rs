//! Commands into the playback engine and events back out
//!
//! Caller threads never touch a live graph. They describe what should
//! happen as an [`EngineCommand`], push it onto the command queue, and the
//! audio side applies it at the start of its next render. Anything the
//! audio side has to report travels back as a [`PlayerEvent`].
//!
//! Both enums are plain data. Graphs and queued sources cross the queue
//! inside `basedrop::Owned`, so the audio side can drop them without
//! freeing memory or running teardown inline.

use std::fmt;

use crate::element::{ElementError, ElementNotice, ElementParam, PendingSource, SourceId};
use crate::graph::Graph;

use super::track::TrackStatus;

/// Default capacity of the command queue
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Default capacity of the event queue
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Identifies one playing sound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Commands sent from caller threads to the audio side
///
/// Applied in queue order at the start of a render, before any track is
/// processed. Commands for tracks the engine no longer knows are ignored.
pub enum EngineCommand {
    // ─────────────────────────────────────────────────────────────
    // Track lifecycle
    // ─────────────────────────────────────────────────────────────
    /// Start a prepared graph after `delay_frames` frames
    ///
    /// `status` is shared with the caller's registry and is retired by the
    /// audio side whenever the track leaves the engine.
    Play {
        track: TrackId,
        graph: basedrop::Owned<Graph>,
        status: basedrop::Shared<TrackStatus>,
        gain: f32,
        delay_frames: u64,
    },
    /// Hold the track; it contributes silence until resumed
    Pause(TrackId),
    Resume(TrackId),
    /// Stop and retire the track
    Cancel(TrackId),

    // ─────────────────────────────────────────────────────────────
    // Runtime control
    // ─────────────────────────────────────────────────────────────
    /// Track-level gain applied while mixing
    SetGain { track: TrackId, gain: f32 },
    /// Parameter update for one element of the track's graph
    SetParam {
        track: TrackId,
        element: usize,
        param: ElementParam,
    },
    /// Append a prepared source to a queue element of the track's graph
    Enqueue {
        track: TrackId,
        element: usize,
        id: SourceId,
        source: PendingSource,
    },
    /// Report frames played so far as a [`PlayerEvent::TrackProgress`]
    AskProgress(TrackId),
}

impl EngineCommand {
    pub fn track(&self) -> TrackId {
        match self {
            EngineCommand::Play { track, .. }
            | EngineCommand::SetGain { track, .. }
            | EngineCommand::SetParam { track, .. }
            | EngineCommand::Enqueue { track, .. } => *track,
            EngineCommand::Pause(track)
            | EngineCommand::Resume(track)
            | EngineCommand::Cancel(track)
            | EngineCommand::AskProgress(track) => *track,
        }
    }
}

impl fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineCommand::Play {
                track,
                gain,
                delay_frames,
                ..
            } => f
                .debug_struct("Play")
                .field("track", track)
                .field("gain", gain)
                .field("delay_frames", delay_frames)
                .finish_non_exhaustive(),
            EngineCommand::Pause(track) => f.debug_tuple("Pause").field(track).finish(),
            EngineCommand::Resume(track) => f.debug_tuple("Resume").field(track).finish(),
            EngineCommand::Cancel(track) => f.debug_tuple("Cancel").field(track).finish(),
            EngineCommand::SetGain { track, gain } => f
                .debug_struct("SetGain")
                .field("track", track)
                .field("gain", gain)
                .finish(),
            EngineCommand::SetParam {
                track,
                element,
                param,
            } => f
                .debug_struct("SetParam")
                .field("track", track)
                .field("element", element)
                .field("param", param)
                .finish(),
            EngineCommand::Enqueue {
                track, element, id, ..
            } => f
                .debug_struct("Enqueue")
                .field("track", track)
                .field("element", element)
                .field("id", id)
                .finish_non_exhaustive(),
            EngineCommand::AskProgress(track) => f.debug_tuple("AskProgress").field(track).finish(),
        }
    }
}

/// Why a track stopped with an error
#[derive(Debug)]
pub enum TrackError {
    /// An element of the track's graph failed during processing
    Element(ElementError),
    /// The engine was already mixing its maximum number of tracks
    TooManyTracks,
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackError::Element(e) => write!(f, "{e}"),
            TrackError::TooManyTracks => write!(f, "too many tracks"),
        }
    }
}

/// Notifications from the audio side, polled with `Player::get_event`
#[derive(Debug)]
pub enum PlayerEvent {
    /// The track's graph was processed for the first time
    TrackStarted(TrackId),
    /// The track reached the end of its stream
    TrackFinished(TrackId),
    /// The track was stopped by a cancel command
    TrackCancelled(TrackId),
    /// Answer to an `AskProgress` command
    TrackProgress { track: TrackId, frames: u64 },
    /// The track was stopped by a failure; no other track is affected
    Error { track: TrackId, reason: TrackError },
    /// A parameter update was refused; the track keeps playing
    ParamRejected {
        track: TrackId,
        element: usize,
        param: &'static str,
    },
    /// A queued source was refused and dropped; the track keeps playing
    EnqueueRejected {
        track: TrackId,
        element: usize,
        source: SourceId,
    },
    /// Something happened inside one element of the track's graph
    ElementEvent {
        track: TrackId,
        element: usize,
        kind: ElementNotice,
    },
}

impl PlayerEvent {
    pub fn track(&self) -> TrackId {
        match self {
            PlayerEvent::TrackStarted(track)
            | PlayerEvent::TrackFinished(track)
            | PlayerEvent::TrackCancelled(track) => *track,
            PlayerEvent::TrackProgress { track, .. }
            | PlayerEvent::Error { track, .. }
            | PlayerEvent::ParamRejected { track, .. }
            | PlayerEvent::EnqueueRejected { track, .. }
            | PlayerEvent::ElementEvent { track, .. } => *track,
        }
    }

    /// The track is gone from the engine after this event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlayerEvent::TrackFinished(_) | PlayerEvent::TrackCancelled(_) | PlayerEvent::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_size() {
        // Graphs and sources are boxed by `Owned`, so commands stay pointer-sized
        let size = std::mem::size_of::<EngineCommand>();
        assert!(size <= 48, "EngineCommand is {} bytes, expected <= 48", size);
    }

    #[test]
    fn test_event_track_and_terminal() {
        let id = TrackId(7);
        let events = [
            (PlayerEvent::TrackStarted(id), false),
            (PlayerEvent::TrackProgress { track: id, frames: 10 }, false),
            (
                PlayerEvent::EnqueueRejected {
                    track: id,
                    element: 1,
                    source: SourceId(3),
                },
                false,
            ),
            (
                PlayerEvent::ElementEvent {
                    track: id,
                    element: 2,
                    kind: ElementNotice::SourceDone(SourceId(3)),
                },
                false,
            ),
            (PlayerEvent::TrackFinished(id), true),
            (PlayerEvent::TrackCancelled(id), true),
            (
                PlayerEvent::Error {
                    track: id,
                    reason: TrackError::TooManyTracks,
                },
                true,
            ),
        ];
        for (event, terminal) in events {
            assert_eq!(event.track(), id);
            assert_eq!(event.is_terminal(), terminal, "{event:?}");
        }
    }

    #[test]
    fn test_command_track() {
        assert_eq!(EngineCommand::Cancel(TrackId(3)).track(), TrackId(3));
        let cmd = EngineCommand::SetGain {
            track: TrackId(4),
            gain: 0.5,
        };
        assert_eq!(cmd.track(), TrackId(4));
        assert_eq!(format!("{cmd:?}"), "SetGain { track: TrackId(4), gain: 0.5 }");
        assert_eq!(TrackId(4).to_string(), "#4");
    }
}
