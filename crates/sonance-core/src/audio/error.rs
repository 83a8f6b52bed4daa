//! Device backend error types
//!
//! Every variant is fatal to the player that hit it; devices are never
//! reopened behind the caller's back.

use thiserror::Error;

use crate::types::Format;

/// Which backend call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStage {
    Enumerate,
    Query,
    Build,
    Start,
}

impl std::fmt::Display for DeviceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self {
            DeviceStage::Enumerate => "enumerate devices",
            DeviceStage::Query => "query device configs",
            DeviceStage::Build => "build the output stream",
            DeviceStage::Start => "start the output stream",
        };
        f.write_str(stage)
    }
}

#[derive(Error, Debug)]
pub enum AudioError {
    /// No device to open: none present, no default, or the named one is gone
    #[error("Output device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(Format),

    /// Period of zero frames or above the buffer limit
    #[error("Unsupported period of {0} frames")]
    UnsupportedPeriod(usize),

    #[error("Backend failed to {stage}: {message}")]
    Backend { stage: DeviceStage, message: String },

    #[error("Device '{0}' is already open")]
    AlreadyOpen(String),

    #[error("Device '{0}' is not open")]
    NotOpen(String),

    #[error("Failed to spawn audio thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl AudioError {
    pub(crate) fn backend(stage: DeviceStage, err: impl std::fmt::Display) -> Self {
        AudioError::Backend {
            stage,
            message: err.to_string(),
        }
    }
}

pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_message_names_stage() {
        let err = AudioError::backend(DeviceStage::Build, "busy");
        assert_eq!(err.to_string(), "Backend failed to build the output stream: busy");
    }
}
