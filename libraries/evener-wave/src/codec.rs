//! RIFF/RIFX PCM decoding and encoding
//!
//! Header offsets used here:
//!
//! ```text
//! 0   "RIFF" | "RIFX"
//! 8   "WAVE"
//! 12  "fmt "
//! 16  fmt chunk size            (u32)
//! 20  format tag, 1 = PCM       (u16)
//! 22  channels                  (u16)
//! 24  sample rate               (u32)
//! 34  bits per sample           (u16)
//! 28 + fmt size                 first data byte, preceded by the data size (u32)
//! ```

use crate::error::{FormatError, Result};
use crate::layout::{ByteOrder, WaveLayout};
use crate::{FULL_SCALE, MAX_SAMPLE_BYTES};

const RIFF_MAGIC: &[u8; 4] = b"RIFF";
const RIFX_MAGIC: &[u8; 4] = b"RIFX";
const WAVE_ID: &[u8; 4] = b"WAVE";
const FMT_ID: &[u8; 4] = b"fmt ";

/// 'F', the last byte of "RIFF"
const LITTLE_ENDIAN_MARKER: u8 = 0x46;
const PCM_FORMAT_TAG: u32 = 1;

/// Bytes needed to reach the end of the bits-per-sample field
const MIN_HEADER_LEN: usize = 36;

/// Distance from the fmt chunk size field to the first data byte, minus the fmt body
const DATA_OFFSET_BASE: usize = 28;

/// Determine the byte order from the fourth byte of the magic
pub fn sniff_byte_order(buffer: &[u8]) -> ByteOrder {
    if buffer.get(3) == Some(&LITTLE_ENDIAN_MARKER) {
        ByteOrder::LittleEndian
    } else {
        ByteOrder::BigEndian
    }
}

/// Validate the header and locate the sample data
///
/// # Errors
/// - [`FormatError::NotPcmWave`] if the magic, form type, fmt id, or format tag is wrong
/// - [`FormatError::UnsupportedBitDepth`] if the sample width is not 1-4 bytes
/// - [`FormatError::TruncatedData`] if the data chunk runs past the buffer
pub fn read_layout(buffer: &[u8]) -> Result<WaveLayout> {
    if buffer.len() < MIN_HEADER_LEN {
        return Err(FormatError::NotPcmWave);
    }

    let magic = &buffer[0..4];
    if magic != RIFF_MAGIC && magic != RIFX_MAGIC {
        return Err(FormatError::NotPcmWave);
    }
    let order = sniff_byte_order(buffer);

    if &buffer[8..12] != WAVE_ID || &buffer[12..16] != FMT_ID {
        return Err(FormatError::NotPcmWave);
    }
    if order.read_uint(&buffer[20..22]) != PCM_FORMAT_TAG {
        return Err(FormatError::NotPcmWave);
    }

    let fmt_size = order.read_uint(&buffer[16..20]) as usize;
    let data_start = DATA_OFFSET_BASE
        .checked_add(fmt_size)
        .ok_or(FormatError::TruncatedData {
            declared_end: usize::MAX,
            available: buffer.len(),
        })?;
    if data_start > buffer.len() {
        return Err(FormatError::TruncatedData {
            declared_end: data_start,
            available: buffer.len(),
        });
    }

    let bits_per_sample = order.read_uint(&buffer[34..36]) as u16;
    let step = usize::from(bits_per_sample).div_ceil(8);
    if step == 0 || step > MAX_SAMPLE_BYTES {
        return Err(FormatError::UnsupportedBitDepth(bits_per_sample));
    }

    let data_size = order.read_uint(&buffer[data_start - 4..data_start]) as usize;
    let declared_end = data_start.saturating_add(data_size);
    if declared_end > buffer.len() {
        return Err(FormatError::TruncatedData {
            declared_end,
            available: buffer.len(),
        });
    }

    // A trailing partial sample is not part of the sample data
    let data_end = data_start + (data_size / step) * step;

    Ok(WaveLayout {
        byte_order: order,
        step,
        data_start,
        data_end,
        channels: order.read_uint(&buffer[22..24]) as u16,
        sample_rate: order.read_uint(&buffer[24..28]),
        bits_per_sample,
    })
}

/// Decode every sample of a WAVE buffer into the normalized domain
///
/// # Errors
/// See [`read_layout`].
pub fn decode(buffer: &[u8]) -> Result<(Vec<f64>, WaveLayout)> {
    let layout = read_layout(buffer)?;
    let samples = decode_samples(buffer, &layout)?;
    Ok((samples, layout))
}

/// Decode the samples of a buffer whose layout is already known
///
/// # Errors
/// Returns [`FormatError::BufferMismatch`] if the buffer is too short for the layout.
pub fn decode_samples(buffer: &[u8], layout: &WaveLayout) -> Result<Vec<f64>> {
    let data = buffer
        .get(layout.data_range())
        .ok_or_else(|| mismatch_for(buffer, layout))?;

    let shift = layout.shift();
    Ok(data
        .chunks_exact(layout.step)
        .map(|chunk| decode_sample(chunk, layout.byte_order, shift))
        .collect())
}

/// Write `samples` into a copy of `original` at the layout's data offsets
///
/// Bytes outside the data range are copied unchanged.
///
/// # Errors
/// - [`FormatError::BufferMismatch`] if the sample count differs from the layout
///   or `original` cannot hold the data range
/// - [`FormatError::SampleOverflow`] if a scaled sample does not fit 32 bits
pub fn encode(samples: &[f64], layout: &WaveLayout, original: &[u8]) -> Result<Vec<u8>> {
    if original.len() < layout.data_end {
        return Err(mismatch_for(original, layout));
    }
    let expected = layout.sample_count();
    if samples.len() != expected {
        return Err(FormatError::BufferMismatch {
            expected,
            actual: samples.len(),
        });
    }

    let mut output = original.to_vec();
    let shift = layout.shift();
    let data = &mut output[layout.data_range()];

    for (index, (&sample, slot)) in samples
        .iter()
        .zip(data.chunks_exact_mut(layout.step))
        .enumerate()
    {
        let word = encode_sample(sample).ok_or(FormatError::SampleOverflow {
            index,
            value: sample,
        })?;
        layout.byte_order.write_uint((word >> shift) as u32, slot);
    }

    Ok(output)
}

fn decode_sample(bytes: &[u8], order: ByteOrder, shift: u32) -> f64 {
    // Widen into the high bits, then reinterpret as signed
    let word = (order.read_uint(bytes) << shift) as i32;
    f64::from(word) / FULL_SCALE
}

fn encode_sample(sample: f64) -> Option<i32> {
    let scaled = (sample * FULL_SCALE).round();
    if scaled >= f64::from(i32::MIN) && scaled <= f64::from(i32::MAX) {
        Some(scaled as i32)
    } else {
        None
    }
}

fn mismatch_for(buffer: &[u8], layout: &WaveLayout) -> FormatError {
    FormatError::BufferMismatch {
        expected: layout.sample_count(),
        actual: buffer.len().saturating_sub(layout.data_start) / layout.step,
    }
}
