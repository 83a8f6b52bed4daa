//! Sonance Core - real-time audio graphs, mixing and playback
//!
//! This crate provides the playback engine and its building blocks:
//! - PCM formats and frame buffers ([`types`])
//! - Audio elements: sources, transforms, combiners, sequencers ([`element`])
//! - Graphs of linked elements and their serializable classes ([`graph`])
//! - Resource loading for file-backed sources ([`loader`])
//! - Output devices: native, manual and ring-buffered ([`audio`])
//! - The track mixer and the player that drives it ([`engine`])
//! - YAML configuration ([`config`])
//!
//! ```ignore
//! use sonance_core::{Player, PlayOptions, PlayerConfig};
//!
//! let player = Player::with_default_output(PlayerConfig::default(), loader)?;
//! let track = player.play("sounds/click.wav", PlayOptions::default().with_gain(0.5))?;
//! while let Some(event) = player.get_event() {
//!     println!("{event:?}");
//! }
//! ```

pub mod audio;
pub mod config;
pub mod element;
pub mod engine;
pub mod graph;
pub mod loader;
pub mod types;

pub use config::PlayerConfig;
pub use element::{ElementNotice, ElementParam, SourceId};
pub use engine::{PlayOptions, PlaySource, Player, PlayerError, PlayerEvent, PlayerHandle, TrackId};
pub use graph::{ElementDesc, Graph, GraphClass};
pub use loader::{FileSystemLoader, MemoryLoader, ResourceLoader};
pub use types::{Buffer, Format, SampleType};
