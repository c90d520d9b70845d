// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Receive-side sample sinks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use num_complex::Complex;
use trx_fircore::{BandpassControl, BandpassFilter};
use trx_iqlink::SampleSink;

/// Writes samples as interleaved little-endian `f32` I/Q.
pub struct IqFileSink {
    writer: BufWriter<File>,
    written: u64,
}

impl IqFileSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl SampleSink for IqFileSink {
    fn consume(&mut self, samples: &[Complex<f32>]) -> Result<(), String> {
        for s in samples {
            self.writer
                .write_all(&s.re.to_le_bytes())
                .and_then(|_| self.writer.write_all(&s.im.to_le_bytes()))
                .map_err(|e| format!("write: {}", e))?;
        }
        self.written += samples.len() as u64;
        self.writer.flush().map_err(|e| format!("flush: {}", e))
    }
}

/// Runs samples through a bandpass before handing them on.
pub struct FilterSink {
    filter: BandpassFilter,
    out: Vec<Complex<f32>>,
    next: Box<dyn SampleSink>,
}

impl FilterSink {
    pub fn new(filter: BandpassFilter, next: Box<dyn SampleSink>) -> Self {
        Self {
            filter,
            out: Vec::new(),
            next,
        }
    }

    /// Handle for retuning from another thread.
    pub fn control(&self) -> BandpassControl {
        self.filter.control()
    }
}

impl SampleSink for FilterSink {
    fn consume(&mut self, samples: &[Complex<f32>]) -> Result<(), String> {
        self.out.clear();
        self.filter.filter_into(samples, &mut self.out);
        if self.out.is_empty() {
            return Ok(());
        }
        self.next.consume(&self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use trx_fircore::{BandpassParams, Window};

    struct Capture(Arc<Mutex<Vec<Complex<f32>>>>);

    impl SampleSink for Capture {
        fn consume(&mut self, samples: &[Complex<f32>]) -> Result<(), String> {
            self.0.lock().unwrap().extend_from_slice(samples);
            Ok(())
        }
    }

    #[test]
    fn file_sink_writes_interleaved_f32() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.iq");
        let mut sink = IqFileSink::create(&path).unwrap();
        sink.consume(&[Complex::new(0.5, -0.25), Complex::new(1.0, 0.0)])
            .unwrap();
        assert_eq!(sink.written(), 2);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 0.5);
        assert_eq!(f32::from_le_bytes(bytes[4..8].try_into().unwrap()), -0.25);
        assert_eq!(f32::from_le_bytes(bytes[8..12].try_into().unwrap()), 1.0);
    }

    #[test]
    fn filter_sink_forwards_whole_blocks() {
        let params = BandpassParams {
            low_hz: -3_000.0,
            high_hz: 3_000.0,
            sample_rate: 48_000.0,
            taps: 64,
            window: Window::BlackmanHarris,
            gain: 1.0,
        };
        let filter = BandpassFilter::new(params, 64, false).unwrap();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut sink = FilterSink::new(filter, Box::new(Capture(Arc::clone(&captured))));

        sink.consume(&vec![Complex::new(1.0, 0.0); 100]).unwrap();
        assert_eq!(captured.lock().unwrap().len(), 64);
        sink.consume(&vec![Complex::new(1.0, 0.0); 28]).unwrap();
        assert_eq!(captured.lock().unwrap().len(), 128);
    }
}
