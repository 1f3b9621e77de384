//! Root resolution and traversal-safe path joining.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::DEFAULT_UPLOAD_NAME;
use crate::error::PathError;

/// Absolute, normalized shared root. Created (with parents) if missing.
pub fn resolve_root(dir: impl AsRef<Path>) -> Result<PathBuf, PathError> {
    let dir = dir.as_ref();
    if dir.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    let root = normalize(&std::path::absolute(dir)?);

    match fs::metadata(&root) {
        Ok(meta) if meta.is_dir() => Ok(root),
        Ok(_) => Err(PathError::NotADirectory(root)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(&root)?;
            tracing::info!("created shared directory {}", root.display());
            Ok(root)
        }
        Err(err) => Err(err.into()),
    }
}

/// Join a peer-supplied relative name onto `root`.
///
/// Rejects empty input, absolute paths and any `..` that climbs above the
/// root. When part of the result already exists on disk, its real location
/// (symlinks followed) must also lie inside the root.
pub fn safe_path(root: impl AsRef<Path>, input: &str) -> Result<PathBuf, PathError> {
    if input.is_empty() {
        return Err(PathError::Empty);
    }

    let mut relative = PathBuf::new();
    for component in Path::new(input).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(PathError::NotLocal(input.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::NotLocal(input.to_string()));
            }
        }
    }

    let root = normalize(&std::path::absolute(root.as_ref())?);
    let full = root.join(&relative);
    ensure_within(&root, &full, input)?;
    Ok(full)
}

/// Base name of a peer-chosen file name, or `upload` when nothing usable
/// remains. Control characters are dropped.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !c.is_control()).collect();
    Path::new(cleaned.trim())
        .file_name()
        .map(|base| base.to_string_lossy().into_owned())
        .filter(|base| !base.is_empty())
        .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string())
}

/// Hidden sibling of `dest` that an incoming file is written to before it
/// replaces `dest`. `tag` keeps concurrent uploads of one name apart.
pub fn partial_path(dest: &Path, tag: &str) -> PathBuf {
    let base = dest
        .file_name()
        .map(|base| base.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string());
    dest.with_file_name(format!(".{base}.{tag}.part"))
}

fn ensure_within(root: &Path, full: &Path, input: &str) -> Result<(), PathError> {
    // Nothing on disk yet, so nothing can redirect the path
    let Ok(real_root) = root.canonicalize() else {
        return Ok(());
    };

    let mut probe = full;
    loop {
        match probe.symlink_metadata() {
            Ok(_) => break,
            Err(err) if err.kind() == io::ErrorKind::NotFound => match probe.parent() {
                Some(parent) => probe = parent,
                None => return Ok(()),
            },
            Err(err) => return Err(err.into()),
        }
    }

    // A dangling symlink cannot be resolved and is treated as an escape
    match probe.canonicalize() {
        Ok(real) if real.starts_with(&real_root) => Ok(()),
        _ => Err(PathError::EscapesRoot(input.to_string())),
    }
}

/// Lexically resolve `.` and `..` in an absolute path
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_valid_relative_path() {
        let root = TempDir::new().unwrap();
        let path = safe_path(root.path(), "foo.txt").unwrap();
        assert_eq!(path, root.path().join("foo.txt"));

        let path = safe_path(root.path(), "./sub/../bar.txt").unwrap();
        assert_eq!(path, root.path().join("bar.txt"));
    }

    #[test]
    fn test_traversal_rejected() {
        let root = TempDir::new().unwrap();
        for input in ["..", "../etc/passwd", "sub/../../etc/passwd", "a/b/../../../x"] {
            assert!(
                matches!(safe_path(root.path(), input), Err(PathError::NotLocal(_))),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_absolute_and_empty_rejected() {
        let root = TempDir::new().unwrap();
        assert!(matches!(safe_path(root.path(), "/etc/passwd"), Err(PathError::NotLocal(_))));
        assert!(matches!(safe_path(root.path(), ""), Err(PathError::Empty)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        assert!(matches!(
            safe_path(root.path(), "link/secret.txt"),
            Err(PathError::EscapesRoot(_))
        ));

        std::os::unix::fs::symlink("/nonexistent/target", root.path().join("dangling")).unwrap();
        assert!(matches!(safe_path(root.path(), "dangling"), Err(PathError::EscapesRoot(_))));
    }

    #[test]
    fn test_resolve_root_creates_missing() {
        let base = TempDir::new().unwrap();
        let wanted = base.path().join("share").join("nested");
        let root = resolve_root(&wanted).unwrap();
        assert_eq!(root, wanted);
        assert!(root.is_dir());
    }

    #[test]
    fn test_resolve_root_rejects_file() {
        let base = TempDir::new().unwrap();
        let file = base.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(resolve_root(&file), Err(PathError::NotADirectory(_))));
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let root = TempDir::new().unwrap();
        let dest = safe_path(root.path(), "report.pdf").unwrap();
        let partial = partial_path(&dest, "ab12");
        assert_eq!(partial, root.path().join(".report.pdf.ab12.part"));
        assert_ne!(partial_path(&dest, "cd34"), partial);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("notes.md"), "notes.md");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("dir/"), "dir");
        assert_eq!(sanitize_filename(""), DEFAULT_UPLOAD_NAME);
        assert_eq!(sanitize_filename("."), DEFAULT_UPLOAD_NAME);
        assert_eq!(sanitize_filename(".."), DEFAULT_UPLOAD_NAME);
        assert_eq!(sanitize_filename("bad\u{0}name"), "badname");
    }
}
