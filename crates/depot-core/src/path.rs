//! Cache-root-contained path resolution for untrusted segments.
//!
//! Every path the engine reads, writes or serves comes out of
//! [`CacheRoot::resolve`]. Segments are checked lexically first; the joined
//! candidate is then canonicalized (following symlinks, tolerating a missing
//! tail) and must still sit under the canonical root.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::{CacheError, CacheResult};

/// The process-wide cache root, canonicalized once at construction.
#[derive(Debug, Clone)]
pub struct CacheRoot {
    root: PathBuf,
}

impl CacheRoot {
    /// Create the directory if needed and pin its canonical form.
    pub fn new(dir: impl AsRef<Path>) -> CacheResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| CacheError::io("failed to create cache root", e))?;
        let root = std::fs::canonicalize(dir)
            .map_err(|e| CacheError::io("failed to canonicalize cache root", e))?;
        Ok(Self { root })
    }

    /// Canonical cache root.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Build a contained path from untrusted segments.
    ///
    /// A segment may itself contain `/`-separated components (Maven and PyPI
    /// artifact paths); each component is validated on its own.
    pub fn resolve<S: AsRef<str>>(&self, segments: &[S]) -> CacheResult<PathBuf> {
        let mut candidate = self.root.clone();
        for segment in segments {
            for component in validate_segment(segment.as_ref())? {
                candidate.push(component);
            }
        }
        self.contain(&candidate)
    }

    /// Re-check that an already computed path is still inside the root.
    ///
    /// Used right before writing and serving, since the filesystem may have
    /// changed since the path was resolved.
    pub fn verify(&self, path: &Path) -> CacheResult<PathBuf> {
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(CacheError::PathEscape {
                path: path.display().to_string(),
            });
        }
        self.contain(path)
    }

    fn contain(&self, candidate: &Path) -> CacheResult<PathBuf> {
        let canonical = canonicalize_lenient(candidate).map_err(|e| CacheError::PathEscape {
            path: format!("{} ({})", candidate.display(), e),
        })?;

        if canonical.starts_with(&self.root) {
            Ok(canonical)
        } else {
            warn!(
                candidate = %candidate.display(),
                resolved = %canonical.display(),
                root = %self.root.display(),
                "resolved path escapes cache root"
            );
            Err(CacheError::PathEscape {
                path: canonical.display().to_string(),
            })
        }
    }
}

/// Split one untrusted segment into validated path components.
fn validate_segment(segment: &str) -> CacheResult<Vec<&str>> {
    let reject = |reason: &str| CacheError::InvalidPath {
        segment: segment.to_string(),
        reason: reason.to_string(),
    };

    if segment.is_empty() {
        return Err(reject("empty segment"));
    }
    if segment.contains('\0') {
        return Err(reject("NUL byte"));
    }
    if segment.contains('\\') {
        return Err(reject("backslash separator"));
    }
    if segment.starts_with('/') {
        return Err(reject("absolute path"));
    }
    let bytes = segment.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(reject("drive-letter path"));
    }

    let mut components = Vec::new();
    for component in segment.split('/') {
        match component {
            "" => return Err(reject("empty path component")),
            "." => return Err(reject("current-directory component")),
            ".." => return Err(reject("parent-directory component")),
            c => components.push(c),
        }
    }
    Ok(components)
}

/// Canonicalize without requiring the path to exist.
///
/// Resolves the deepest existing ancestor and re-appends the missing tail.
/// A dangling symlink is followed to its target rather than treated as a
/// missing component, so a link pointing at a not-yet-created directory is
/// judged by where it points.
fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    let mut hops = 0;

    loop {
        match std::fs::canonicalize(&existing) {
            Ok(mut resolved) => {
                for name in tail.iter().rev() {
                    resolved.push(name);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let is_link = std::fs::symlink_metadata(&existing)
                    .map(|m| m.file_type().is_symlink())
                    .unwrap_or(false);
                if is_link {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "too many levels of symbolic links",
                        ));
                    }
                    let target = std::fs::read_link(&existing)?;
                    existing = match existing.parent() {
                        Some(parent) if target.is_relative() => parent.join(target),
                        _ => target,
                    };
                    continue;
                }

                // `..` in a link target has no file name and ends up here.
                let name = existing
                    .file_name()
                    .map(|n| n.to_os_string())
                    .ok_or(e)?;
                tail.push(name);
                if !existing.pop() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "no existing ancestor",
                    ));
                }
            }
            Err(e) => return Err(e),
        }
    }
}

const MAX_SYMLINK_HOPS: usize = 40;
