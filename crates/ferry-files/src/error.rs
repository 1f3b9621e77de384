//! Shared-directory errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from resolving or reading the shared directory
#[derive(Debug, Error)]
pub enum PathError {
    /// No path given
    #[error("empty path")]
    Empty,

    /// Absolute path, or one that climbs above its starting point
    #[error("path not local: {0}")]
    NotLocal(String),

    /// Path resolves outside the shared root (e.g. through a symlink)
    #[error("path escapes root: {0}")]
    EscapesRoot(String),

    /// Shared root exists but is not a directory
    #[error("root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Listing pattern is not a valid glob
    #[error("invalid pattern {pattern:?}: {reason}")]
    Pattern {
        /// Pattern as given
        pattern: String,
        /// Why it was rejected
        reason: String,
    },

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
