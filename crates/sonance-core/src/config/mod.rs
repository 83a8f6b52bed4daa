//! Configuration for sonance players
//!
//! - [`PlayerConfig`]: stream format, queues, threading and device selection
//! - Generic YAML config loading/saving
//! - Default config locations
//!
//! # Usage
//!
//! ```ignore
//! use sonance_core::config::{default_config_path, load_config, save_config, PlayerConfig};
//!
//! let path = default_config_path("player.yaml");
//! let config: PlayerConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod io;
mod paths;
mod player;

pub use io::{load_config, read_config, save_config};
pub use paths::{default_config_dir, default_config_path};
pub use player::PlayerConfig;
