//! Path normalization and case-insensitive path identity

use crate::error::IoFailure;
use std::path::{Component, Path, PathBuf};

/// Make `path` absolute and resolve `.` and `..` lexically
///
/// Symlinks are not resolved and the path does not need to exist.
///
/// # Errors
/// Returns [`IoFailure::InvalidPath`] for an empty path, or
/// [`IoFailure::Io`] if the working directory cannot be determined.
pub fn normalize_path(path: &Path) -> Result<PathBuf, IoFailure> {
    if path.as_os_str().is_empty() {
        return Err(IoFailure::InvalidPath("empty path".to_string()));
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| IoFailure::Io(format!("current directory: {}", e)))?
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Identity of a file path, equal for paths that differ only in case or
/// in `.`/`..` segments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(String);

impl PathKey {
    /// Build the key for any (possibly relative) path
    ///
    /// # Errors
    /// See [`normalize_path`].
    pub fn new(path: &Path) -> Result<Self, IoFailure> {
        Ok(Self::from_normalized(&normalize_path(path)?))
    }

    /// Build the key for a path that is already normalized
    pub fn from_normalized(path: &Path) -> Self {
        Self(path.to_string_lossy().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether two paths name the same file under case-insensitive comparison
pub fn same_path(a: &Path, b: &Path) -> bool {
    match (PathKey::new(a), PathKey::new(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
