//! Error kinds for the delta engine.

use std::path::PathBuf;

/// Errors surfaced by `build_signature`, `compare`, and the stream
/// `seek`/`read` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A failure of the external byte source or sink.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `seek` to a virtual offset not covered by any part of a `Sparse` or
    /// `ChainLink` stream.
    #[error("seek to offset {offset} does not fall within any known part")]
    InvalidOffset { offset: u64 },

    /// An internal consistency check failed. Should be unreachable;
    /// indicates a bug in this crate rather than a user error.
    #[error("broken invariant: {0}")]
    BrokenInvariant(&'static str),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
