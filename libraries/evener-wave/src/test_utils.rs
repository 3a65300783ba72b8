//! Test utilities for building WAVE buffers
//!
//! Builds RIFF and RIFX files byte by byte, so tests can cover every sample
//! width, both byte orders, extended fmt chunks and trailing chunks without
//! depending on an external writer.

use crate::layout::ByteOrder;
use crate::FULL_SCALE;

/// Shape of a generated WAVE file
#[derive(Debug, Clone)]
pub struct WaveSpec {
    pub byte_order: ByteOrder,
    /// Width used to store the samples
    pub bits_per_sample: u16,
    /// Value written into the bits-per-sample header field, if it differs
    pub bits_field: Option<u16>,
    pub channels: u16,
    pub sample_rate: u32,
    pub format_tag: u16,
    /// Extra bytes appended to the 16-byte fmt body
    pub fmt_padding: usize,
    /// Chunks written after the data chunk
    pub trailing: Vec<([u8; 4], Vec<u8>)>,
}

impl WaveSpec {
    pub fn new(byte_order: ByteOrder, bits_per_sample: u16) -> Self {
        Self {
            byte_order,
            bits_per_sample,
            bits_field: None,
            channels: 1,
            sample_rate: 44100,
            format_tag: 1,
            fmt_padding: 0,
            trailing: Vec::new(),
        }
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn format_tag(mut self, tag: u16) -> Self {
        self.format_tag = tag;
        self
    }

    pub fn bits_field(mut self, bits: u16) -> Self {
        self.bits_field = Some(bits);
        self
    }

    pub fn fmt_padding(mut self, bytes: usize) -> Self {
        self.fmt_padding = bytes;
        self
    }

    pub fn trailing_chunk(mut self, id: &[u8; 4], body: &[u8]) -> Self {
        self.trailing.push((*id, body.to_vec()));
        self
    }

    /// Storage width in bytes
    pub fn step(&self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8)
    }
}

/// Build a WAVE buffer holding `raw` sample values (low `step` bytes of each)
pub fn build_wave(spec: &WaveSpec, raw: &[u32]) -> Vec<u8> {
    let order = spec.byte_order;
    let step = spec.step();
    let fmt_size = 16 + spec.fmt_padding;
    let data_size = raw.len() * step;

    let mut out = Vec::with_capacity(44 + spec.fmt_padding + data_size);
    out.extend_from_slice(match order {
        ByteOrder::LittleEndian => b"RIFF",
        ByteOrder::BigEndian => b"RIFX",
    });
    push(&mut out, order, 0, 4); // patched below
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    push(&mut out, order, fmt_size as u32, 4);
    push(&mut out, order, u32::from(spec.format_tag), 2);
    push(&mut out, order, u32::from(spec.channels), 2);
    push(&mut out, order, spec.sample_rate, 4);
    let block_align = u32::from(spec.channels) * step as u32;
    push(&mut out, order, spec.sample_rate * block_align, 4);
    push(&mut out, order, block_align, 2);
    push(
        &mut out,
        order,
        u32::from(spec.bits_field.unwrap_or(spec.bits_per_sample)),
        2,
    );
    out.extend(std::iter::repeat(0u8).take(spec.fmt_padding));

    out.extend_from_slice(b"data");
    push(&mut out, order, data_size as u32, 4);
    for &value in raw {
        push(&mut out, order, value, step);
    }

    for (id, body) in &spec.trailing {
        out.extend_from_slice(id);
        push(&mut out, order, body.len() as u32, 4);
        out.extend_from_slice(body);
    }

    let riff_size = (out.len() - 8) as u32;
    order.write_uint(riff_size, &mut out[4..8]);
    out
}

/// Quantize normalized samples the same way the encoder does
pub fn quantize(spec: &WaveSpec, samples: &[f64]) -> Vec<u32> {
    let shift = ((4 - spec.step()) * 8) as u32;
    samples
        .iter()
        .map(|&s| {
            let word = (s * FULL_SCALE).round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32;
            (word >> shift) as u32
        })
        .collect()
}

/// Build a WAVE buffer from normalized samples
pub fn build_wave_from_samples(spec: &WaveSpec, samples: &[f64]) -> Vec<u8> {
    build_wave(spec, &quantize(spec, samples))
}

fn push(out: &mut Vec<u8>, order: ByteOrder, value: u32, width: usize) {
    let start = out.len();
    out.resize(start + width, 0);
    order.write_uint(value, &mut out[start..]);
}
