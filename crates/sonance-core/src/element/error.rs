//! Element and graph error types

use thiserror::Error;

use super::SourceId;
use crate::loader::LoaderError;
use crate::types::Format;

/// Errors raised while preparing or processing elements and graphs
#[derive(Error, Debug)]
pub enum ElementError {
    /// Connected elements disagree on the stream format
    #[error("Format mismatch at {element}: expected {expected}, found {found}")]
    FormatMismatch {
        element: String,
        expected: String,
        found: Format,
    },

    /// The graph contains a cycle
    #[error("Graph {graph} contains a cycle")]
    CyclicGraph { graph: String },

    /// An input port (or the graph output) has no link
    #[error("Port {element}:{port} is not linked")]
    UnlinkedPort { element: String, port: String },

    /// A port already carries a link
    #[error("Port {element}:{port} is already linked")]
    DuplicateLink { element: String, port: String },

    #[error("Unknown element: {0}")]
    UnknownElement(String),

    #[error("Unknown port {element}:{port}")]
    UnknownPort { element: String, port: String },

    /// No element type is registered under this name
    #[error("Unknown element type: {0}")]
    UnknownKind(String),

    /// An element argument is missing or out of range
    #[error("Invalid argument {arg} for {element}: {reason}")]
    InvalidArgument {
        element: String,
        arg: String,
        reason: String,
    },

    #[error(transparent)]
    Resource(#[from] LoaderError),

    /// Malformed or unsupported codec data
    #[error("Decode error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    /// The container holds no decodable audio track
    #[error("No playable audio track in {0}")]
    NoAudioTrack(String),

    #[error("Resampler error: {0}")]
    Resampler(String),

    /// The element does not take this runtime parameter
    #[error("Element {element} does not accept parameter {param}")]
    UnsupportedParam {
        element: String,
        param: &'static str,
    },

    /// A queue holds no source with this id
    #[error("Element {element} holds no {source_id}")]
    UnknownSource { element: String, source_id: SourceId },

    #[error("Element {0} was processed before prepare")]
    NotPrepared(String),

    /// A proxied source failed on its worker thread
    #[error("Proxied source failed: {0}")]
    Proxy(&'static str),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl ElementError {
    pub fn invalid_argument(
        element: impl Into<String>,
        arg: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidArgument {
            element: element.into(),
            arg: arg.into(),
            reason: reason.into(),
        }
    }

    /// Check whether this is a missing-resource failure
    pub fn is_resource_not_found(&self) -> bool {
        matches!(self, ElementError::Resource(LoaderError::NotFound(_)))
    }
}

/// Result type for element operations
pub type ElementResult<T> = Result<T, ElementError>;
