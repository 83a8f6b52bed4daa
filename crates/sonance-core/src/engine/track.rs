//! One playing sound inside the engine

use std::sync::atomic::{AtomicBool, Ordering};

use crate::element::gain::MAX_GAIN;
use crate::element::{ElementResult, Status};
use crate::graph::Graph;
use crate::types::Buffer;

use super::command::TrackId;

/// Lifecycle of a track
///
/// ```text
///   Queued ──► Playing ──► Finished
///     │          ▲ │
///     │          │ ▼
///     │         Paused
///     └──────────────────► Cancelled (from any live state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Waiting out its start delay
    Queued,
    Playing,
    Paused,
    Finished,
    Cancelled,
}

/// What a render did with the track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendered {
    /// Nothing was processed (paused, waiting, retired)
    Idle,
    /// Frames were produced into the scratch buffer at `offset`
    Frames { offset: usize, first: bool, done: bool },
}

/// Liveness flag shared between a track and the caller's registry
///
/// The audio side sets it the moment the track leaves the engine, so the
/// caller side knows a track is gone even when its terminal event was
/// dropped on a full event queue.
#[derive(Debug, Default)]
pub struct TrackStatus {
    retired: AtomicBool,
}

impl TrackStatus {
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

/// Engine-side state of one track
pub struct Track {
    id: TrackId,
    graph: basedrop::Owned<Graph>,
    status: basedrop::Shared<TrackStatus>,
    state: TrackState,
    /// State to return to on resume
    resume_to: TrackState,
    gain: f32,
    delay_remaining: u64,
    started: bool,
    frames_played: u64,
}

impl Track {
    pub fn new(
        id: TrackId,
        graph: basedrop::Owned<Graph>,
        status: basedrop::Shared<TrackStatus>,
        gain: f32,
        delay_frames: u64,
    ) -> Self {
        Self {
            id,
            graph,
            status,
            state: TrackState::Queued,
            resume_to: TrackState::Queued,
            gain: gain.clamp(0.0, MAX_GAIN),
            delay_remaining: delay_frames,
            started: false,
            frames_played: 0,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, MAX_GAIN);
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Finished or cancelled; the engine drops it after this render
    pub fn is_retired(&self) -> bool {
        matches!(self.state, TrackState::Finished | TrackState::Cancelled)
    }

    /// Hold a queued or playing track; returns false if nothing changed
    pub fn pause(&mut self) -> bool {
        match self.state {
            TrackState::Queued | TrackState::Playing => {
                self.resume_to = self.state;
                self.state = TrackState::Paused;
                true
            }
            _ => false,
        }
    }

    pub fn resume(&mut self) -> bool {
        if self.state == TrackState::Paused {
            self.state = self.resume_to;
            true
        } else {
            false
        }
    }

    /// Returns false when the track had already ended
    pub fn cancel(&mut self) -> bool {
        if self.is_retired() {
            return false;
        }
        self.retire(TrackState::Cancelled);
        true
    }

    /// Mark a failed track as stopped
    pub fn fail(&mut self) {
        self.retire(TrackState::Cancelled);
    }

    fn retire(&mut self, state: TrackState) {
        self.state = state;
        self.status.retire();
    }

    /// Render up to `frames` frames of this track into `scratch`
    ///
    /// A queued track whose delay runs out inside the window starts at the
    /// matching offset, so its first sample lands exactly after the delay.
    pub fn render(&mut self, scratch: &mut Buffer, frames: usize) -> ElementResult<Rendered> {
        let offset = match self.state {
            TrackState::Queued => {
                if self.delay_remaining >= frames as u64 {
                    self.delay_remaining -= frames as u64;
                    return Ok(Rendered::Idle);
                }
                let offset = self.delay_remaining as usize;
                self.delay_remaining = 0;
                self.state = TrackState::Playing;
                offset
            }
            TrackState::Playing => 0,
            TrackState::Paused | TrackState::Finished | TrackState::Cancelled => {
                return Ok(Rendered::Idle)
            }
        };

        let status = self.graph.render(scratch, frames - offset)?;
        let first = !self.started;
        self.started = true;
        self.frames_played += scratch.frame_count() as u64;
        let done = status == Status::Done;
        if done {
            self.retire(TrackState::Finished);
        }
        Ok(Rendered::Frames { offset, first, done })
    }
}
