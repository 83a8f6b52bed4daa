//! Playback engine - tracks, mixing and the player API
//!
//! ```text
//!   caller threads                      audio side
//!   ──────────────                      ──────────
//!   Player / PlayerHandle ──commands──► PlaybackEngine ──► device buffer
//!          ▲                                 │
//!          └────────────events───────────────┘
//!                     retired graphs ──► Reclaimer (deferred drop)
//! ```

mod command;
mod engine;
mod gc;
mod player;
mod queue;
mod track;

pub use command::{
    EngineCommand, PlayerEvent, TrackError, TrackId, COMMAND_QUEUE_CAPACITY, EVENT_QUEUE_CAPACITY,
};
pub use engine::{EngineStats, PlaybackEngine, StatsSnapshot, DEFAULT_MAX_TRACKS};
pub use gc::{Reclaimer, DEFAULT_RECLAIM_INTERVAL};
pub use player::{PlayOptions, PlaySource, Player, PlayerError, PlayerHandle, PlayerResult, Threading};
pub use queue::{MessageQueue, QueueKind};
pub use track::{Rendered, Track, TrackState, TrackStatus};
