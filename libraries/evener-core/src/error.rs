//! Error types for leveling and batch operations

use evener_wave::FormatError;
use thiserror::Error;

/// Result type for leveling operations
pub type Result<T> = std::result::Result<T, LevelError>;

/// Failures reported by the file-system collaborator
///
/// This is a closed set so callers can decide between retrying, skipping a
/// file, or reporting it, without inspecting OS error codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoFailure {
    /// The path is malformed, missing, or names a directory
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Generic I/O failure while reading or writing
    #[error("IO error: {0}")]
    Io(String),

    /// The process lacks permission to access the file
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Another handle holds the exclusive lock on the file
    #[error("File is locked by another handle: {0}")]
    Locked(String),

    /// Anything the other variants do not describe
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Errors that can occur while opening, checking, or adjusting files
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LevelError {
    /// The file is not a PCM WAVE file or its layout is inconsistent
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Reading, writing, or locking the file failed
    #[error(transparent)]
    Io(#[from] IoFailure),

    /// The data chunk holds no samples
    #[error("No audio samples in file")]
    NoSamples,

    /// Every sample is zero, so there is no average to scale
    #[error("Audio is silent (weighted average is zero)")]
    SilentAudio,

    /// The weight formula produced a negative, non-finite, or all-zero weight
    #[error("Weight formula produced unusable weights")]
    InvalidWeights,

    /// Reaching the target would push the loudest sample past full scale
    #[error("With target average {target:.6} overmodulation would occur (peak {peak:.6} would become {resulting_peak:.6})")]
    Overmodulation {
        target: f64,
        peak: f64,
        resulting_peak: f64,
    },

    /// The handle was closed before the operation
    #[error("File handle is closed: {0}")]
    Closed(String),

    /// The path is not open in the registry
    #[error("File is not open: {0}")]
    NotOpen(String),

    /// None of the reference paths is open
    #[error("None of the reference files is open")]
    NoReferenceFiles,

    /// The level factor is not a positive finite number
    #[error("Invalid level factor: {0} (must be positive and finite)")]
    InvalidFactor(f64),

    /// A background batch task panicked or was aborted
    #[error("Batch task failed: {0}")]
    TaskFailed(String),
}
