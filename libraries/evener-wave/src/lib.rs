//! Evener WAVE codec
//!
//! Bit-exact decoding and re-encoding of integer PCM samples stored in
//! RIFF (little endian) and RIFX (big endian) WAVE files.
//!
//! Samples of 1 to 4 bytes are widened into the high bits of a 32-bit word
//! and divided by `i32::MAX`, so every width shares the same normalized
//! domain. Encoding is the exact inverse and only touches the bytes of the
//! data chunk; headers and any trailing chunks are copied through.
//!
//! # Example
//!
//! ```ignore
//! use evener_wave::{decode, encode};
//!
//! let bytes = std::fs::read("take.wav")?;
//! let (mut samples, layout) = decode(&bytes)?;
//!
//! for sample in &mut samples {
//!     *sample *= 0.5;
//! }
//!
//! let rewritten = encode(&samples, &layout, &bytes)?;
//! assert_eq!(rewritten.len(), bytes.len());
//! ```

#![deny(unsafe_code)]

mod codec;
mod error;
mod layout;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use codec::{decode, decode_samples, encode, read_layout, sniff_byte_order};
pub use error::{FormatError, Result};
pub use layout::{ByteOrder, WaveLayout};

/// Scale between a 32-bit signed word and the normalized sample domain
pub const FULL_SCALE: f64 = i32::MAX as f64;

/// Largest supported sample width in bytes
pub const MAX_SAMPLE_BYTES: usize = 4;
