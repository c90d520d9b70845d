// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Timer-driven consumer of the read queue.
//!
//! Every tick reads `sample_rate * elapsed` samples, adjusted by the rate
//! corrector, and hands them to a [`SampleSink`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use num_complex::Complex;
use tracing::debug;

use crate::correction::{ClockSync, RateCorrector};
use crate::log_limit::WarnLimiter;
use crate::read_queue::ReadQueue;
use crate::stats::StreamStats;

/// Downstream consumer of pulled samples.
pub trait SampleSink: Send + 'static {
    fn consume(&mut self, samples: &[Complex<f32>]) -> Result<(), String>;
}

/// Discards everything.
pub struct NullSink;

impl SampleSink for NullSink {
    fn consume(&mut self, _samples: &[Complex<f32>]) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PullSettings {
    pub tick: Duration,
    pub auto_correction: bool,
    /// Correction bound as a fraction of the nominal chunk.
    pub correction_limit: f64,
}

impl Default for PullSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            auto_correction: true,
            correction_limit: 0.01,
        }
    }
}

pub struct PullPacer {
    queue: Arc<ReadQueue>,
    stats: Arc<StreamStats>,
    sync: Arc<ClockSync>,
    settings: PullSettings,
    corrector: RateCorrector,
    epoch: u64,
    carry: f64,
    buf: Vec<Complex<f32>>,
    sink_errors: WarnLimiter,
}

impl PullPacer {
    pub fn new(
        queue: Arc<ReadQueue>,
        stats: Arc<StreamStats>,
        sync: Arc<ClockSync>,
        settings: PullSettings,
    ) -> Self {
        let epoch = sync.epoch();
        Self {
            queue,
            stats,
            sync,
            corrector: RateCorrector::new(settings.correction_limit),
            settings,
            epoch,
            carry: 0.0,
            buf: Vec::new(),
            sink_errors: WarnLimiter::new("sample sink"),
        }
    }

    pub fn correction(&self) -> f64 {
        self.corrector.correction()
    }

    /// Pull the samples owed for `elapsed` and pass them to `sink`.
    /// Returns the number of samples handed over, silence included.
    pub fn tick(&mut self, elapsed: Duration, sink: &mut dyn SampleSink) -> usize {
        let epoch = self.sync.epoch();
        if epoch != self.epoch {
            debug!("stream rate changed, resetting correction");
            self.corrector.reset();
            self.carry = 0.0;
            self.epoch = epoch;
        }

        let nominal = self.sync.sample_rate() as f64 * elapsed.as_secs_f64();
        let correction = if self.settings.auto_correction {
            self.corrector
                .update(self.queue.fill_ratio(), self.sync.drift_ppm(), nominal)
        } else {
            0.0
        };
        self.stats.set_correction(correction);

        let total = (nominal + correction + self.carry).max(0.0);
        let count = total.floor();
        self.carry = total - count;
        let count = count as usize;

        self.buf.resize(count, Complex::new(0.0, 0.0));
        self.queue.read_into(&mut self.buf);
        if let Err(e) = sink.consume(&self.buf) {
            self.sink_errors.warn(&e);
        }
        count
    }

    /// Run on a named thread until `stop` is raised.
    pub fn spawn(mut self, mut sink: Box<dyn SampleSink>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("iq-rx-pull".to_string())
            .spawn(move || {
                let tick = self.settings.tick;
                let mut last = Instant::now();
                let mut next = last + tick;
                while !stop.load(Ordering::Relaxed) {
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    }
                    let now = Instant::now();
                    self.tick(now - last, sink.as_mut());
                    last = now;
                    next += tick;
                    if next < now {
                        next = now + tick;
                    }
                }
                debug!("pull loop stopped");
            })
            .expect("failed to spawn iq-rx-pull thread")
    }
}
