// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Conversion between `Complex<f32>` and interleaved integer I/Q bytes.

use num_complex::Complex;

use crate::codec::CodecError;

/// Integer sample layout on the wire.
///
/// `bytes` is the width of one I or Q component (2 or 4), `bits` the
/// effective resolution inside it (16 for 2-byte samples, 24 for 4-byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFormat {
    pub bytes: u8,
    pub bits: u8,
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self { bytes: 2, bits: 16 }
    }
}

impl SampleFormat {
    pub fn new(bytes: u8, bits: u8) -> Result<Self, CodecError> {
        match bytes {
            2 | 4 => Ok(Self {
                bytes,
                bits: bits.clamp(1, bytes * 8),
            }),
            other => Err(CodecError::SampleWidth(other)),
        }
    }

    /// Bytes per complex sample.
    pub fn frame_bytes(&self) -> usize {
        2 * self.bytes as usize
    }

    fn full_scale(&self) -> f32 {
        ((1u64 << (self.bits.max(1) - 1)) - 1).max(1) as f32
    }

    /// Encode `samples` into `out`, saturating at full scale. `out` must hold
    /// `samples.len() * frame_bytes()` bytes.
    pub fn encode(&self, samples: &[Complex<f32>], out: &mut [u8]) {
        let scale = self.full_scale();
        let width = self.bytes as usize;
        for (sample, chunk) in samples.iter().zip(out.chunks_exact_mut(2 * width)) {
            let (i_bytes, q_bytes) = chunk.split_at_mut(width);
            self.put(sample.re * scale, scale, i_bytes);
            self.put(sample.im * scale, scale, q_bytes);
        }
    }

    fn put(&self, value: f32, scale: f32, out: &mut [u8]) {
        let v = value.round().clamp(-scale, scale) as i32;
        match self.bytes {
            2 => out.copy_from_slice(&(v as i16).to_le_bytes()),
            _ => out.copy_from_slice(&v.to_le_bytes()),
        }
    }

    /// Decode interleaved I/Q bytes, appending normalised samples to `out`.
    pub fn decode(&self, bytes: &[u8], out: &mut Vec<Complex<f32>>) {
        let inv = 1.0 / self.full_scale();
        let width = self.bytes as usize;
        out.extend(bytes.chunks_exact(2 * width).map(|chunk| {
            let (i_bytes, q_bytes) = chunk.split_at(width);
            Complex::new(self.get(i_bytes) * inv, self.get(q_bytes) * inv)
        }));
    }

    fn get(&self, bytes: &[u8]) -> f32 {
        match self.bytes {
            2 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            _ => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_bit_layout() {
        let fmt = SampleFormat::default();
        let mut out = [0u8; 4];
        fmt.encode(&[Complex::new(1.0, -1.0)], &mut out);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 32767);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), -32767);
    }

    #[test]
    fn saturates_out_of_range() {
        let fmt = SampleFormat::new(4, 24).unwrap();
        let mut out = [0u8; 8];
        fmt.encode(&[Complex::new(3.0, -0.5)], &mut out);
        let i = i32::from_le_bytes([out[0], out[1], out[2], out[3]]);
        let q = i32::from_le_bytes([out[4], out[5], out[6], out[7]]);
        assert_eq!(i, (1 << 23) - 1);
        assert_eq!(q, -(1 << 22));
    }

    #[test]
    fn decode_recovers_within_quantisation() {
        for fmt in [SampleFormat::default(), SampleFormat::new(4, 24).unwrap()] {
            let input = [Complex::new(0.25, -0.75), Complex::new(-0.1, 0.9)];
            let mut wire = vec![0u8; input.len() * fmt.frame_bytes()];
            fmt.encode(&input, &mut wire);
            let mut back = Vec::new();
            fmt.decode(&wire, &mut back);
            for (a, b) in input.iter().zip(&back) {
                assert!((a - b).norm() < 1e-4, "{fmt:?}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn rejects_odd_widths() {
        assert_eq!(SampleFormat::new(3, 24), Err(CodecError::SampleWidth(3)));
    }
}
