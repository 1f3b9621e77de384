//! Shared directory listings.

use std::fs;
use std::path::Path;

use glob::Pattern;

use crate::error::PathError;

/// One entry of the shared directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Entry name (not a path)
    pub name: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
}

/// List the immediate entries of `root`, sorted by name.
///
/// A non-empty `pattern` is a glob matched against entry names (`*.txt`,
/// `report-?.pdf`, `[a-c]*`).
pub fn list_dir(
    root: impl AsRef<Path>,
    pattern: Option<&str>,
) -> Result<Vec<FileEntry>, PathError> {
    let pattern = match pattern.filter(|p| !p.is_empty()) {
        Some(p) => Some(Pattern::new(p).map_err(|e| PathError::Pattern {
            pattern: p.to_string(),
            reason: e.to_string(),
        })?),
        None => None,
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(root.as_ref())? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if pattern.as_ref().is_some_and(|p| !p.matches(&name)) {
            continue;
        }
        let meta = entry.metadata()?;
        entries.push(FileEntry {
            name,
            is_dir: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
