use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong between reading a manifest and drawing a frame.
///
/// Configuration failures abort start-up before the render loop exists. Streaming
/// failures stay isolated to the atlas or cell that produced them, and capacity
/// failures are skipped and logged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to stream {path:?} (atlas {atlas:?}): {reason}")]
    Streaming {
        atlas: Option<usize>,
        path: PathBuf,
        reason: String,
    },

    #[error("no free LOD slot for cell {cell}")]
    CapacityExceeded { cell: usize },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to parse manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Manifest(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
