// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Sample sources feeding the transmit framer.

use std::f64::consts::TAU;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use num_complex::Complex;

/// Abstraction over any IQ sample source.
pub trait IqSource: Send + 'static {
    /// Read the next block of IQ samples into `buf`.
    /// Returns the number of samples written, or an error string.
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> Result<usize, String>;

    /// Called when the stream sample rate changes.
    fn set_sample_rate(&mut self, _sample_rate: u32) {}
}

/// Silence.
pub struct MockIqSource;

impl IqSource for MockIqSource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> Result<usize, String> {
        buf.fill(Complex::new(0.0, 0.0));
        Ok(buf.len())
    }
}

/// Complex exponential at a fixed offset from the centre frequency.
pub struct ToneIqSource {
    tone_hz: f64,
    amplitude: f32,
    sample_rate: u32,
    phase: f64,
}

impl ToneIqSource {
    pub fn new(tone_hz: f64, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            tone_hz,
            amplitude,
            sample_rate: sample_rate.max(1),
            phase: 0.0,
        }
    }
}

impl IqSource for ToneIqSource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> Result<usize, String> {
        let step = TAU * self.tone_hz / self.sample_rate as f64;
        for sample in buf.iter_mut() {
            let (sin, cos) = self.phase.sin_cos();
            *sample = Complex::new(cos as f32, sin as f32) * self.amplitude;
            self.phase = (self.phase + step) % TAU;
        }
        Ok(buf.len())
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
    }
}

/// Interleaved little-endian `f32` I/Q file, replayed in a loop.
pub struct FileIqSource {
    reader: BufReader<File>,
}

impl FileIqSource {
    pub fn open(path: &Path) -> Result<Self, String> {
        let file = File::open(path).map_err(|e| format!("open {}: {}", path.display(), e))?;
        let len = file
            .metadata()
            .map_err(|e| format!("stat {}: {}", path.display(), e))?
            .len();
        if len < 8 {
            return Err(format!("{} holds no complete I/Q sample", path.display()));
        }
        Ok(Self {
            reader: BufReader::new(file),
        })
    }

    fn next_sample(&mut self) -> Result<Complex<f32>, String> {
        let mut raw = [0u8; 8];
        loop {
            match self.reader.read_exact(&mut raw) {
                Ok(()) => {
                    let i = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                    let q = f32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
                    return Ok(Complex::new(i, q));
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    self.reader
                        .seek(SeekFrom::Start(0))
                        .map_err(|e| format!("rewind: {}", e))?;
                }
                Err(e) => return Err(format!("read: {}", e)),
            }
        }
    }
}

impl IqSource for FileIqSource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> Result<usize, String> {
        for sample in buf.iter_mut() {
            *sample = self.next_sample()?;
        }
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tone_has_constant_envelope_and_expected_step() {
        let mut src = ToneIqSource::new(1_000.0, 0.5, 48_000);
        let mut buf = vec![Complex::new(0.0, 0.0); 96];
        assert_eq!(src.read_into(&mut buf).unwrap(), 96);
        for s in &buf {
            assert!((s.norm() - 0.5).abs() < 1e-5);
        }
        let step = (buf[1] * buf[0].conj()).arg();
        assert!((step as f64 - TAU / 48.0).abs() < 1e-4);
    }

    #[test]
    fn file_source_loops() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for (i, q) in [(0.25f32, -0.25f32), (0.5, 0.75)] {
            file.write_all(&i.to_le_bytes()).unwrap();
            file.write_all(&q.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();

        let mut src = FileIqSource::open(file.path()).unwrap();
        let mut buf = vec![Complex::new(0.0, 0.0); 5];
        src.read_into(&mut buf).unwrap();
        assert_eq!(buf[0], Complex::new(0.25, -0.25));
        assert_eq!(buf[1], Complex::new(0.5, 0.75));
        assert_eq!(buf[2], buf[0]);
        assert_eq!(buf[4], buf[0]);
    }

    #[test]
    fn empty_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(FileIqSource::open(file.path()).is_err());
    }

    #[test]
    fn mock_is_silent() {
        let mut buf = vec![Complex::new(1.0, 1.0); 4];
        MockIqSource.read_into(&mut buf).unwrap();
        assert!(buf.iter().all(|s| s.norm() == 0.0));
    }
}
