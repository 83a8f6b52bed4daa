//! Output devices for the player
//!
//! A device owns the clock and pulls rendered periods through a
//! [`RenderCallback`]. Backends:
//!
//! - **CPAL** (feature `cpal-backend`): native output on ALSA/PulseAudio,
//!   WASAPI and CoreAudio
//! - **Ring**: periods rendered ahead into an rtrb ring, read by any consumer
//! - **Manual**: the host pulls each period itself
//!
//! The [`period_ring`] used by the ring device also decouples the player's
//! own render thread from the device callback.

mod backend;
mod config;
mod error;
mod manual;
mod ring;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;

pub use backend::{AudioDevice, DeviceInfo, RenderCallback};
pub(crate) use backend::checked;
pub use config::{BufferSize, DeviceId, OutputConfig, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
pub use error::{AudioError, AudioResult, DeviceStage};
pub use manual::{ManualDevice, ManualPull};
pub use ring::{period_ring, RingDevice, RingOutput, RingReader, RingWriter, DEFAULT_RING_PERIODS};

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::{output_devices, CpalDevice, OutputDevice};
