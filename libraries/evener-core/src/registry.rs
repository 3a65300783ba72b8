//! Registry of open files and batch coordinator
//!
//! Files are identified by path only. Keys compare case-insensitively on the
//! absolute, lexically normalized path, so `./Take.wav` and `take.WAV` name
//! the same entry. Iteration follows insertion order.

use crate::batch::{BatchEvent, BatchPlan, BatchSummary, BatchTask, CancelFlag, CheckReport, TargetLevel};
use crate::error::{LevelError, Result};
use crate::handle::AudioHandle;
use crate::io::{FileIo, StdFileIo};
use crate::level::{LevelMetrics, LevelModel};
use crate::path::PathKey;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Open files keyed by normalized path
///
/// Dropping the registry closes every handle it still owns.
pub struct FileRegistry {
    model: LevelModel,
    io: Arc<dyn FileIo>,
    handles: HashMap<PathKey, Arc<AudioHandle>>,
    order: Vec<PathKey>,
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRegistry")
            .field("model", &self.model)
            .field("open", &self.order.len())
            .finish()
    }
}

impl FileRegistry {
    /// Empty registry with the default level model and `std::fs` access
    pub fn new() -> Self {
        Self::with_parts(LevelModel::default(), Arc::new(StdFileIo))
    }

    /// Empty registry with a custom level model and file-system collaborator
    pub fn with_parts(model: LevelModel, io: Arc<dyn FileIo>) -> Self {
        Self {
            model,
            io,
            handles: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn model(&self) -> &LevelModel {
        &self.model
    }

    /// Open `path`, replacing any handle already open for it
    ///
    /// Returns `false` and leaves the registry unchanged if the file cannot
    /// be opened.
    pub fn open(&mut self, path: &Path) -> bool {
        match self.open_detailed(path) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Failed to open {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Like [`open`](Self::open), but reports why opening failed
    ///
    /// # Errors
    /// Returns the [`LevelError`] from reading, decoding, measuring, or
    /// locking the file. The registry is unchanged then; a handle being
    /// replaced keeps its entry and is locked again.
    pub fn open_detailed(&mut self, path: &Path) -> Result<LevelMetrics> {
        let loaded = AudioHandle::load(path, &self.model, self.io.as_ref())?;
        let key = PathKey::from_normalized(loaded.path());

        // The old handle must let go of its file before the new one can lock.
        // Both may name different files when paths differ only in case.
        let previous = self.handles.get(&key).cloned();
        let released = match &previous {
            Some(old) if !old.is_closed() => {
                old.close();
                true
            }
            _ => false,
        };

        let handle = match AudioHandle::lock_loaded(loaded, self.model.clone(), Arc::clone(&self.io)) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                if let (true, Some(old)) = (released, &previous) {
                    if let Err(relock_err) = old.relock() {
                        tracing::warn!(
                            "Failed to lock {} again after a failed re-open: {}",
                            old.path().display(),
                            relock_err
                        );
                    }
                }
                return Err(e);
            }
        };
        let metrics = handle.metrics();

        if self.handles.insert(key.clone(), handle).is_none() {
            self.order.push(key);
        }
        Ok(metrics)
    }

    /// Close and forget `path`; does nothing if it is not open
    pub fn close(&mut self, path: &Path) {
        let Ok(key) = PathKey::new(path) else {
            return;
        };
        if let Some(handle) = self.handles.remove(&key) {
            handle.close();
            self.order.retain(|k| k != &key);
        }
    }

    /// Close every open file
    pub fn close_all(&mut self) {
        for key in self.order.drain(..) {
            if let Some(handle) = self.handles.remove(&key) {
                handle.close();
            }
        }
        self.handles.clear();
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.handle(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Normalized paths of every open file, in the order they were opened
    pub fn paths(&self) -> Vec<PathBuf> {
        self.order
            .iter()
            .filter_map(|key| self.handles.get(key))
            .map(|handle| handle.path().to_path_buf())
            .collect()
    }

    /// Metrics measured when `path` was opened
    pub fn metrics(&self, path: &Path) -> Option<LevelMetrics> {
        self.handle(path).map(|handle| handle.metrics())
    }

    /// Shared handle for `path`, if open
    pub fn handle(&self, path: &Path) -> Option<Arc<AudioHandle>> {
        let key = PathKey::new(path).ok()?;
        self.handles.get(&key).cloned()
    }

    /// Work out the target level and pin the selected handles
    ///
    /// With no reference paths every file is scaled by `factor` relative to
    /// its own average. Otherwise the target is `factor` times the plain mean
    /// of the reference files' weighted averages, shared by every file.
    ///
    /// # Errors
    /// - [`LevelError::InvalidFactor`] if `factor` is not positive and finite
    /// - [`LevelError::NoReferenceFiles`] if reference paths were given but none is open
    pub fn plan<P, R>(&self, selected: &[P], reference: &[R], factor: f64) -> Result<BatchPlan>
    where
        P: AsRef<Path>,
        R: AsRef<Path>,
    {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(LevelError::InvalidFactor(factor));
        }

        let target = if reference.is_empty() {
            TargetLevel::Individual { factor }
        } else {
            TargetLevel::Shared {
                target: factor * self.reference_average(reference)?,
            }
        };

        let mut seen = HashSet::new();
        let mut files = Vec::with_capacity(selected.len());
        for path in selected {
            let path = path.as_ref();
            match PathKey::new(path) {
                Ok(key) => {
                    if !seen.insert(key.clone()) {
                        continue;
                    }
                    match self.handles.get(&key) {
                        Some(handle) => files.push((handle.path().to_path_buf(), Some(Arc::clone(handle)))),
                        None => files.push((path.to_path_buf(), None)),
                    }
                }
                Err(_) => files.push((path.to_path_buf(), None)),
            }
        }

        Ok(BatchPlan::new(files, target))
    }

    /// Mean of the weighted averages of the open reference files
    fn reference_average<R: AsRef<Path>>(&self, reference: &[R]) -> Result<f64> {
        let mut seen = HashSet::new();
        let mut averages = Vec::new();
        for path in reference {
            let path = path.as_ref();
            let Ok(key) = PathKey::new(path) else {
                tracing::warn!("Ignoring invalid reference path {}", path.display());
                continue;
            };
            if !seen.insert(key.clone()) {
                continue;
            }
            match self.handles.get(&key) {
                Some(handle) => averages.push(handle.weighted_average()),
                None => tracing::warn!("Ignoring reference {}: file is not open", path.display()),
            }
        }

        if averages.is_empty() {
            return Err(LevelError::NoReferenceFiles);
        }
        Ok(averages.iter().sum::<f64>() / averages.len() as f64)
    }

    /// Find the selected files that would clip at their target level
    ///
    /// `on_progress` fires once per selected file with a fraction that ends
    /// at exactly 1.0.
    ///
    /// # Errors
    /// See [`plan`](Self::plan).
    pub fn check_overmodulation<P, R>(
        &self,
        selected: &[P],
        reference: &[R],
        factor: f64,
        cancel: &CancelFlag,
        on_progress: impl FnMut(f64),
    ) -> Result<CheckReport>
    where
        P: AsRef<Path>,
        R: AsRef<Path>,
    {
        Ok(self.plan(selected, reference, factor)?.run_check(cancel, on_progress))
    }

    /// Adjust the selected files towards their target level
    ///
    /// Each file is written to `output_path_of(path)`; a path equal to the
    /// source is overwritten in place. Per-file failures are reported through
    /// `on_event` and never stop the batch.
    ///
    /// # Errors
    /// See [`plan`](Self::plan). Per-file errors are not returned here.
    pub fn adjust_files<P, R, O>(
        &self,
        selected: &[P],
        reference: &[R],
        factor: f64,
        output_path_of: O,
        cancel: &CancelFlag,
        on_event: impl FnMut(BatchEvent),
    ) -> Result<BatchSummary>
    where
        P: AsRef<Path>,
        R: AsRef<Path>,
        O: Fn(&Path) -> PathBuf,
    {
        Ok(self
            .plan(selected, reference, factor)?
            .run_adjust(output_path_of, cancel, on_event))
    }

    /// Start an overmodulation check in the background
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// See [`plan`](Self::plan).
    pub fn spawn_check_overmodulation<P, R>(
        &self,
        selected: &[P],
        reference: &[R],
        factor: f64,
    ) -> Result<BatchTask<CheckReport>>
    where
        P: AsRef<Path>,
        R: AsRef<Path>,
    {
        Ok(self
            .plan(selected, reference, factor)?
            .spawn_check(CancelFlag::new()))
    }

    /// Start an adjustment batch in the background
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// See [`plan`](Self::plan).
    pub fn spawn_adjust_files<P, R, O>(
        &self,
        selected: &[P],
        reference: &[R],
        factor: f64,
        output_path_of: O,
    ) -> Result<BatchTask<BatchSummary>>
    where
        P: AsRef<Path>,
        R: AsRef<Path>,
        O: Fn(&Path) -> PathBuf + Send + 'static,
    {
        Ok(self
            .plan(selected, reference, factor)?
            .spawn_adjust(output_path_of, CancelFlag::new()))
    }
}

impl Drop for FileRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
