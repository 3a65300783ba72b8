//! Header metadata extracted once per file

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Byte order of every multi-byte field in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// "RIFF" files
    LittleEndian,
    /// "RIFX" files
    BigEndian,
}

impl ByteOrder {
    /// Read an unsigned integer of `bytes.len()` (1-4) bytes
    pub fn read_uint(self, bytes: &[u8]) -> u32 {
        debug_assert!((1..=4).contains(&bytes.len()));
        match self {
            Self::LittleEndian => bytes
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)),
            Self::BigEndian => bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)),
        }
    }

    /// Write the low `out.len()` bytes of `value`
    pub fn write_uint(self, value: u32, out: &mut [u8]) {
        let width = out.len();
        for k in 0..width {
            let byte = (value >> (8 * k)) as u8;
            match self {
                Self::LittleEndian => out[k] = byte,
                Self::BigEndian => out[width - 1 - k] = byte,
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LittleEndian => "little_endian",
            Self::BigEndian => "big_endian",
        }
    }
}

/// Location and shape of the sample data inside a WAVE buffer
///
/// `step` is the sample width in bytes (`ceil(bits_per_sample / 8)`), and
/// `data_end - data_start` is always a whole multiple of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveLayout {
    pub byte_order: ByteOrder,
    /// Sample width in bytes (1-4)
    pub step: usize,
    /// Offset of the first sample byte
    pub data_start: usize,
    /// Offset one past the last whole sample
    pub data_end: usize,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WaveLayout {
    /// Number of samples in the data chunk (all channels interleaved)
    pub fn sample_count(&self) -> usize {
        (self.data_end - self.data_start) / self.step
    }

    pub fn data_range(&self) -> Range<usize> {
        self.data_start..self.data_end
    }

    /// Left shift that moves a sample into the high bits of a 32-bit word
    pub fn shift(&self) -> u32 {
        ((crate::MAX_SAMPLE_BYTES - self.step) * 8) as u32
    }

    /// Playback length in seconds, when the header carries usable values
    pub fn duration_seconds(&self) -> Option<f64> {
        if self.sample_rate == 0 || self.channels == 0 {
            return None;
        }
        let frames = self.sample_count() / usize::from(self.channels);
        Some(frames as f64 / f64::from(self.sample_rate))
    }
}
