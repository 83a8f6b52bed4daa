//! Resource supply for file sources
//!
//! The engine never knows about content packaging. A [`ResourceLoader`]
//! maps a content path to either a fully in-memory byte buffer or a
//! seekable stream handle, and the [`IoStrategy`] picks between the two
//! per deployment. Sandboxed hosts where random-access IO is slow or
//! synchronous should preload.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while resolving a resource
#[derive(Error, Debug)]
pub enum LoaderError {
    /// The path does not name a resource
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The resource exists but could not be read
    #[error("Failed to read resource {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Result type for loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;

/// How a file source reads its bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IoStrategy {
    /// Read the whole resource into memory before decoding
    Preload,
    /// Read from storage incrementally while decoding
    #[default]
    Stream,
}

impl IoStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Preload" | "preload" | "Memory" => Some(IoStrategy::Preload),
            "Stream" | "stream" | "Default" => Some(IoStrategy::Stream),
            _ => None,
        }
    }
}

/// Seekable byte stream that can move to the audio thread
pub trait ReadSeek: Read + Seek + Send + Sync {}

impl<T: Read + Seek + Send + Sync> ReadSeek for T {}

/// Bytes handed to a decoder
pub enum AudioStream {
    /// Fully loaded resource
    Memory(Arc<[u8]>),
    /// Open handle read incrementally
    Stream(Box<dyn ReadSeek>),
}

impl AudioStream {
    pub fn is_memory(&self) -> bool {
        matches!(self, AudioStream::Memory(_))
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioStream::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
            AudioStream::Stream(_) => write!(f, "Stream"),
        }
    }
}

/// Supplies encoded audio for a content path
pub trait ResourceLoader: Send + Sync {
    fn open(&self, path: &str, strategy: IoStrategy) -> LoaderResult<AudioStream>;
}

/// Loader that resolves paths against a root directory
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

impl Default for FileSystemLoader {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ResourceLoader for FileSystemLoader {
    fn open(&self, path: &str, strategy: IoStrategy) -> LoaderResult<AudioStream> {
        let full = self.resolve(path);
        let map_err = |source: io::Error| {
            if source.kind() == io::ErrorKind::NotFound {
                LoaderError::NotFound(path.to_string())
            } else {
                LoaderError::Io {
                    path: path.to_string(),
                    source,
                }
            }
        };
        match strategy {
            IoStrategy::Preload => {
                let bytes = std::fs::read(&full).map_err(map_err)?;
                log::debug!("Preloaded {} ({} bytes)", full.display(), bytes.len());
                Ok(AudioStream::Memory(bytes.into()))
            }
            IoStrategy::Stream => {
                let file = File::open(&full).map_err(map_err)?;
                Ok(AudioStream::Stream(Box::new(file)))
            }
        }
    }
}

/// Loader backed by an in-memory table of resources
///
/// Always serves [`AudioStream::Memory`] regardless of the strategy.
#[derive(Default)]
pub struct MemoryLoader {
    resources: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.resources.write().insert(path.into(), bytes.into());
    }

    pub fn remove(&self, path: &str) -> bool {
        self.resources.write().remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceLoader for MemoryLoader {
    fn open(&self, path: &str, _strategy: IoStrategy) -> LoaderResult<AudioStream> {
        self.resources
            .read()
            .get(path)
            .cloned()
            .map(AudioStream::Memory)
            .ok_or_else(|| LoaderError::NotFound(path.to_string()))
    }
}

/// Loader for graphs that never reference resources
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResources;

impl ResourceLoader for NoResources {
    fn open(&self, path: &str, _strategy: IoStrategy) -> LoaderResult<AudioStream> {
        Err(LoaderError::NotFound(path.to_string()))
    }
}
