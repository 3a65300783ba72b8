//! File-system access with OS errors folded into [`IoFailure`]
//!
//! [`FileIo`] is the seam the engine reads and writes whole files through.
//! [`StdFileIo`] is the default implementation over `std::fs`; tests swap in
//! their own to inject failures.

use crate::error::IoFailure;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Whole-file read/write collaborator
pub trait FileIo: Send + Sync {
    /// Read the complete contents of `path`
    ///
    /// # Errors
    /// Returns the [`IoFailure`] matching the OS error.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, IoFailure>;

    /// Create or overwrite `path` with `content`
    ///
    /// # Errors
    /// Returns the [`IoFailure`] matching the OS error.
    fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), IoFailure>;
}

/// [`FileIo`] backed by `std::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileIo;

impl FileIo for StdFileIo {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, IoFailure> {
        reject_directory(path)?;
        fs::read(path).map_err(|e| classify(&e, path))
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), IoFailure> {
        reject_directory(path)?;
        fs::write(path, content).map_err(|e| classify(&e, path))
    }
}

fn reject_directory(path: &Path) -> Result<(), IoFailure> {
    if path.is_dir() {
        return Err(IoFailure::InvalidPath(format!(
            "{} is a directory",
            path.display()
        )));
    }
    Ok(())
}

/// Translate an OS error into the closed failure set
pub fn classify(err: &io::Error, path: &Path) -> IoFailure {
    let detail = format!("{}: {}", path.display(), err);
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::InvalidInput | ErrorKind::Unsupported => {
            IoFailure::InvalidPath(detail)
        }
        ErrorKind::PermissionDenied => IoFailure::PermissionDenied(detail),
        ErrorKind::Other => IoFailure::Unknown(detail),
        _ => IoFailure::Io(detail),
    }
}

/// Exclusive advisory lock on an open file
///
/// The lock is taken without blocking and released when the guard is
/// dropped. Reads and in-place writes of the locked file go through the
/// guard's own descriptor.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
    locked: bool,
}

impl FileLock {
    /// Open `path` for reading and writing and lock it exclusively
    ///
    /// Platforms or file systems without lock support yield an unlocked
    /// guard rather than an error.
    ///
    /// # Errors
    /// - [`IoFailure::Locked`] if another handle holds the lock
    /// - any other [`IoFailure`] if the file cannot be opened
    pub fn acquire(path: &Path) -> Result<Self, IoFailure> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| classify(&e, path))?;

        let locked = match FileExt::try_lock_exclusive(&file) {
            Ok(()) => true,
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                return Err(IoFailure::Locked(path.display().to_string()));
            }
            Err(e) if e.kind() == ErrorKind::Unsupported => {
                tracing::debug!("Locking unsupported for {}: {}", path.display(), e);
                false
            }
            Err(e) => return Err(classify(&e, path)),
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            locked,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Read the current contents from the start of the file
    ///
    /// # Errors
    /// Returns an [`IoFailure`] if seeking or reading fails.
    pub fn read_all(&self) -> Result<Vec<u8>, IoFailure> {
        let mut file = &self.file;
        let mut buffer = Vec::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_end(&mut buffer))
            .map_err(|e| classify(&e, &self.path))?;
        Ok(buffer)
    }

    /// Overwrite the file from offset 0 without truncating first
    ///
    /// # Errors
    /// Returns an [`IoFailure`] if seeking, writing, or syncing fails.
    pub fn overwrite(&self, content: &[u8]) -> Result<(), IoFailure> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.write_all(content))
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_data())
            .map_err(|e| classify(&e, &self.path))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.locked {
            if let Err(e) = FileExt::unlock(&self.file) {
                tracing::warn!("Failed to unlock {}: {}", self.path.display(), e);
            }
        }
    }
}
