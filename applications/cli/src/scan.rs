//! Input discovery
//!
//! Command-line arguments may name files or directories. Directories are
//! walked for files with a configured extension; files are taken as given
//! when their extension matches.

use crate::error::{CliError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Expand `paths` into the list of files to process
///
/// Order follows the arguments; directory contents are sorted by name.
/// Duplicates are dropped. Paths that do not exist are kept so opening
/// them reports the failure.
pub fn collect_inputs(paths: &[PathBuf], extensions: &[String], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            for file in scan_directory(path, extensions, recursive) {
                if seen.insert(file.clone()) {
                    files.push(file);
                }
            }
        } else if has_extension(path, extensions) {
            if seen.insert(path.clone()) {
                files.push(path.clone());
            }
        } else {
            tracing::warn!("Skipping {}: not a supported file type", path.display());
        }
    }

    if files.is_empty() {
        return Err(CliError::NoInputs);
    }
    Ok(files)
}

/// Files under `dir` whose extension is in `extensions`
pub fn scan_directory(dir: &Path, extensions: &[String], recursive: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(dir).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker.into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Failed to scan {}: {}", dir.display(), e);
                continue;
            }
        };

        if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
            files.push(entry.into_path());
        }
    }

    tracing::debug!("Found {} files in {}", files.len(), dir.display());
    files
}

/// Case-insensitive extension match
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
