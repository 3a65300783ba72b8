//! Error types for the WAVE codec

use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, FormatError>;

/// Errors that can occur while decoding or encoding a WAVE buffer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    /// Missing RIFF/RIFX magic, WAVE form type, fmt chunk, or PCM format tag
    #[error("The buffer does not contain a valid RIFF/RIFX wavesound in PCM format")]
    NotPcmWave,

    /// Bits per sample maps to a sample width outside 1..=4 bytes
    #[error("Unsupported bit depth: {0} bits per sample")]
    UnsupportedBitDepth(u16),

    /// The data chunk extends past the end of the buffer
    #[error("Data chunk ends at byte {declared_end} but the buffer holds only {available} bytes")]
    TruncatedData {
        declared_end: usize,
        available: usize,
    },

    /// The samples or the original buffer do not match the decoded layout
    #[error("Buffer does not match the decoded layout: expected {expected} samples, found room for {actual}")]
    BufferMismatch { expected: usize, actual: usize },

    /// A sample does not fit into a 32-bit signed word after scaling
    #[error("Sample {index} ({value}) exceeds full scale")]
    SampleOverflow { index: usize, value: f64 },
}
