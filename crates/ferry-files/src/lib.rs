//! # Ferry Files
//!
//! Access to the shared directory served by Ferry.
//!
//! This crate provides:
//! - Root resolution (absolute, created on first use)
//! - Traversal-safe joining of peer-supplied names onto the root
//! - Directory listings filtered by glob pattern
//! - Sanitizing of names chosen by peers for incoming files
//! - Hidden partial files that incoming uploads land in until complete

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod listing;
pub mod path;

pub use error::PathError;
pub use listing::{FileEntry, list_dir};
pub use path::{partial_path, resolve_root, safe_path, sanitize_filename};

/// Name used for an incoming file when the peer supplies none usable
pub const DEFAULT_UPLOAD_NAME: &str = "upload";
