//! Error types for clip_flow.
//!
//! Per-clip delivery problems are not errors; they are reported as
//! [`crate::delivery::Delivery`] values so the loop can keep going.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Clip '{0}' already exists in the playlist")]
    DuplicateClip(String),

    #[error("Clip '{0}' not found")]
    ClipNotFound(String),

    #[error("Cannot prepare working directory '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
