//! Batch execution over a snapshot of open files
//!
//! A [`BatchPlan`] is built by the registry: it pins the handles of the
//! selected files and the target level, so the run does not touch the
//! registry again. Plans run synchronously on the caller's thread or in the
//! background through [`BatchTask`].

use crate::error::{LevelError, Result};
use crate::handle::AudioHandle;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Cooperative cancellation signal, checked between files
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Level every selected file is driven towards
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetLevel {
    /// Each file is scaled by `factor` relative to its own weighted average
    Individual { factor: f64 },
    /// Every file is driven to the same weighted average
    Shared { target: f64 },
}

impl TargetLevel {
    pub fn for_handle(&self, handle: &AudioHandle) -> f64 {
        match *self {
            Self::Individual { factor } => factor * handle.weighted_average(),
            Self::Shared { target } => target,
        }
    }
}

/// Progress and per-file outcome of a running batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// Fraction of selected files processed, in (0, 1]
    Progress(f64),
    /// The file was adjusted and written
    Succeeded(PathBuf),
    /// The file was skipped because of `error`
    Failed { path: PathBuf, error: LevelError },
    /// The file would clip at its target level
    Overmodulating(PathBuf),
}

/// A file that could not be adjusted
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of an adjustment batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub target: TargetLevel,
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<FileFailure>,
    /// True if the batch stopped before every file was processed
    pub cancelled: bool,
    pub duration_seconds: f64,
}

impl BatchSummary {
    pub fn processed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Outcome of an overmodulation check
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub target: TargetLevel,
    pub overmodulating: BTreeSet<PathBuf>,
    pub checked: usize,
    pub cancelled: bool,
}

impl CheckReport {
    pub fn all_fit(&self) -> bool {
        self.overmodulating.is_empty()
    }
}

/// Selected files and target level, fixed when the batch starts
#[derive(Debug, Clone)]
pub struct BatchPlan {
    /// Selected paths in processing order; `None` if the path is not open
    files: Vec<(PathBuf, Option<Arc<AudioHandle>>)>,
    target: TargetLevel,
}

impl BatchPlan {
    pub(crate) fn new(files: Vec<(PathBuf, Option<Arc<AudioHandle>>)>, target: TargetLevel) -> Self {
        Self { files, target }
    }

    pub fn target(&self) -> TargetLevel {
        self.target
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Test every selected file against its target
    ///
    /// `on_progress` fires once per file. Files that are not open count as
    /// fitting and are logged.
    pub fn run_check(&self, cancel: &CancelFlag, mut on_progress: impl FnMut(f64)) -> CheckReport {
        let total = self.files.len();
        let mut report = CheckReport {
            target: self.target,
            overmodulating: BTreeSet::new(),
            checked: 0,
            cancelled: false,
        };

        tracing::info!("Checking {} files for overmodulation ({:?})", total, self.target);

        for (index, (path, handle)) in self.files.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Overmodulation check cancelled after {} files", index);
                report.cancelled = true;
                break;
            }

            match handle {
                Some(handle) => {
                    let target = self.target.for_handle(handle);
                    if !handle.would_fit(target) {
                        tracing::debug!("{} would overmodulate at {:.6}", path.display(), target);
                        report.overmodulating.insert(path.clone());
                    }
                }
                None => tracing::warn!("Skipping check of {}: file is not open", path.display()),
            }

            report.checked += 1;
            on_progress(progress_fraction(index, total));
        }

        report
    }

    /// Adjust every selected file, writing each to `output_path_of(path)`
    ///
    /// A failing file is reported through `on_event` and the batch moves on.
    /// Cancellation is honored between files; files not reached get no
    /// success or failure event.
    pub fn run_adjust<O>(
        &self,
        output_path_of: O,
        cancel: &CancelFlag,
        mut on_event: impl FnMut(BatchEvent),
    ) -> BatchSummary
    where
        O: Fn(&Path) -> PathBuf,
    {
        let started = Instant::now();
        let total = self.files.len();
        let mut summary = BatchSummary {
            target: self.target,
            succeeded: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
            duration_seconds: 0.0,
        };

        tracing::info!("Adjusting {} files ({:?})", total, self.target);

        for (index, (path, handle)) in self.files.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Adjustment cancelled after {} files", index);
                summary.cancelled = true;
                break;
            }

            let outcome = match handle {
                Some(handle) => {
                    let destination = output_path_of(path);
                    handle.adjust_samples(self.target.for_handle(handle), Some(&destination))
                }
                None => Err(LevelError::NotOpen(path.display().to_string())),
            };

            match outcome {
                Ok(()) => {
                    tracing::debug!("Adjusted {}", path.display());
                    summary.succeeded.push(path.clone());
                    on_event(BatchEvent::Succeeded(path.clone()));
                }
                Err(error) => {
                    tracing::warn!("Failed to adjust {}: {}", path.display(), error);
                    summary.failed.push(FileFailure {
                        path: path.clone(),
                        error: error.to_string(),
                    });
                    on_event(BatchEvent::Failed {
                        path: path.clone(),
                        error,
                    });
                }
            }

            on_event(BatchEvent::Progress(progress_fraction(index, total)));
        }

        summary.duration_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            "Adjustment finished: {} succeeded, {} failed{}",
            summary.succeeded.len(),
            summary.failed.len(),
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        summary
    }

    /// Run [`run_check`](Self::run_check) on a blocking worker thread
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn_check(self, cancel: CancelFlag) -> BatchTask<CheckReport> {
        let (tx, rx) = mpsc::unbounded_channel();
        let flag = cancel.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let report = self.run_check(&flag, |fraction| {
                let _ = tx.send(BatchEvent::Progress(fraction));
            });
            for path in &report.overmodulating {
                let _ = tx.send(BatchEvent::Overmodulating(path.clone()));
            }
            report
        });

        BatchTask {
            events: rx,
            cancel,
            handle,
        }
    }

    /// Run [`run_adjust`](Self::run_adjust) on a blocking worker thread
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn_adjust<O>(self, output_path_of: O, cancel: CancelFlag) -> BatchTask<BatchSummary>
    where
        O: Fn(&Path) -> PathBuf + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let flag = cancel.clone();

        let handle = tokio::task::spawn_blocking(move || {
            self.run_adjust(output_path_of, &flag, |event| {
                let _ = tx.send(event);
            })
        });

        BatchTask {
            events: rx,
            cancel,
            handle,
        }
    }
}

/// A batch running in the background
///
/// Events arrive in order through [`next_event`](Self::next_event); the
/// channel closes when the batch finishes.
pub struct BatchTask<T> {
    events: mpsc::UnboundedReceiver<BatchEvent>,
    cancel: CancelFlag,
    handle: JoinHandle<T>,
}

impl<T> BatchTask<T> {
    /// Ask the batch to stop before the next file
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Next event, or `None` once the batch has finished and all events were read
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// Wait for the batch to finish
    ///
    /// Events not read yet are dropped.
    ///
    /// # Errors
    /// Returns [`LevelError::TaskFailed`] if the worker panicked or was aborted.
    pub async fn join(self) -> Result<T> {
        self.handle
            .await
            .map_err(|e| LevelError::TaskFailed(e.to_string()))
    }
}

fn progress_fraction(index: usize, total: usize) -> f64 {
    if index + 1 >= total {
        1.0
    } else {
        (index + 1) as f64 / total as f64
    }
}
