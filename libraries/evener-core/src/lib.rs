//! Leveling engine for Evener
//!
//! This crate provides:
//! - A pluggable weighted-average level model with an overmodulation check
//! - [`AudioHandle`]: one open, locked WAVE file and its measured level
//! - [`FileRegistry`]: the set of open files and the batch coordinator that
//!   checks and adjusts groups of them towards a shared or individual target
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────┐
//! │  FileIo     │ ──► │ evener-wave  │ ──► │  LevelModel   │
//! │ (read file) │     │  (decode)    │     │  (metrics)    │
//! └─────────────┘     └──────────────┘     └───────────────┘
//!                                                  │
//!                                                  ▼
//!                     ┌──────────────┐     ┌───────────────┐
//!                     │ FileRegistry │ ◄── │  AudioHandle  │
//!                     └──────────────┘     └───────────────┘
//!                            │
//!                            ▼
//!                     ┌──────────────┐
//!                     │  BatchPlan   │ ──► progress / per-file outcome
//!                     └──────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use evener_core::{BatchEvent, CancelFlag, FileRegistry};
//!
//! let mut registry = FileRegistry::new();
//! for path in &paths {
//!     registry.open(path);
//! }
//!
//! // Drive every file to 1.5x the mean level of the first two
//! let summary = registry.adjust_files(
//!     &paths,
//!     &paths[..2],
//!     1.5,
//!     |path| path.to_path_buf(),
//!     &CancelFlag::new(),
//!     |event| {
//!         if let BatchEvent::Failed { path, error } = event {
//!             eprintln!("{}: {}", path.display(), error);
//!         }
//!     },
//! )?;
//! println!("{} files adjusted", summary.succeeded.len());
//! ```

#![deny(unsafe_code)]

mod batch;
mod error;
mod handle;
mod io;
mod level;
mod path;
mod registry;

pub use batch::{
    BatchEvent, BatchPlan, BatchSummary, BatchTask, CancelFlag, CheckReport, FileFailure,
    TargetLevel,
};
pub use error::{IoFailure, LevelError, Result};
pub use handle::AudioHandle;
pub use io::{classify, FileIo, FileLock, StdFileIo};
pub use level::{linear_adjustment, uniform_weight, AdjustFn, LevelMetrics, LevelModel, WeightFn};
pub use path::{normalize_path, same_path, PathKey};
pub use registry::FileRegistry;

pub use evener_wave::{ByteOrder, FormatError, WaveLayout};

/// Default level factor: keep the reference level unchanged
pub const DEFAULT_FACTOR: f64 = 1.0;
