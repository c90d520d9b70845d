// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Rate and timing correction for the receive-side pull loop.
//!
//! Two error sources are combined: read-queue occupancy away from half full,
//! and clock drift between sender and receiver estimated from the metadata
//! timestamps. The result is an adjustment, in samples, to the chunk the pull
//! loop reads per tick.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Observations kept for the drift fit.
const DRIFT_WINDOW: usize = 128;
/// Minimum observations and time span before a drift estimate is reported.
const DRIFT_MIN_POINTS: usize = 8;
const DRIFT_MIN_SPAN_S: f64 = 1.0;
/// Estimates beyond this are treated as clock steps, not drift.
const DRIFT_MAX_PPM: f64 = 1000.0;

/// Least-squares slope of `(local - sender)` against local time.
#[derive(Debug, Default)]
pub struct DriftEstimator {
    points: VecDeque<(f64, f64)>,
}

impl DriftEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one frame: receive time and sender timestamp, both in seconds.
    pub fn observe(&mut self, local_s: f64, sender_s: f64) {
        if self.points.len() == DRIFT_WINDOW {
            self.points.pop_front();
        }
        self.points.push_back((local_s, local_s - sender_s));
    }

    /// Receiver clock rate relative to the sender, in parts per million.
    /// Positive when the receiver clock runs fast.
    pub fn drift_ppm(&self) -> Option<f64> {
        let n = self.points.len();
        if n < DRIFT_MIN_POINTS {
            return None;
        }
        let (first, _) = self.points.front()?;
        let (last, _) = self.points.back()?;
        if last - first < DRIFT_MIN_SPAN_S {
            return None;
        }
        let nf = n as f64;
        let mean_t = self.points.iter().map(|p| p.0).sum::<f64>() / nf;
        let mean_o = self.points.iter().map(|p| p.1).sum::<f64>() / nf;
        let (mut num, mut den) = (0.0, 0.0);
        for &(t, o) in &self.points {
            num += (t - mean_t) * (o - mean_o);
            den += (t - mean_t) * (t - mean_t);
        }
        if den <= f64::EPSILON {
            return None;
        }
        let ppm = num / den * 1e6;
        (ppm.abs() <= DRIFT_MAX_PPM).then_some(ppm)
    }

    pub fn reset(&mut self) {
        self.points.clear();
    }
}

/// Clock state shared between the frame processor and the pull loop.
pub struct ClockSync {
    base: Instant,
    sample_rate: AtomicU32,
    epoch: AtomicU64,
    drift: Mutex<DriftEstimator>,
}

impl ClockSync {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            base: Instant::now(),
            sample_rate: AtomicU32::new(sample_rate),
            epoch: AtomicU64::new(0),
            drift: Mutex::new(DriftEstimator::new()),
        }
    }

    /// Feed a sender timestamp received now.
    pub fn observe(&self, sender_s: f64) {
        let local = self.base.elapsed().as_secs_f64();
        self.observe_at(local, sender_s);
    }

    pub fn observe_at(&self, local_s: f64, sender_s: f64) {
        self.drift
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(local_s, sender_s);
    }

    pub fn drift_ppm(&self) -> Option<f64> {
        self.drift
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drift_ppm()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    /// Adopt a new stream rate. Drift history is discarded and the epoch
    /// advances so the pull loop resets its corrector.
    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.drift
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        self.sample_rate.store(sample_rate, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

/// Smoothed, clamped chunk-size correction.
#[derive(Debug, Clone)]
pub struct RateCorrector {
    /// Gain on occupancy error, in chunks per unit of fill ratio.
    pub gain_fill: f64,
    /// Maximum correction as a fraction of the nominal chunk.
    pub limit: f64,
    correction: f64,
}

impl RateCorrector {
    pub fn new(limit: f64) -> Self {
        Self {
            gain_fill: 0.05,
            limit,
            correction: 0.0,
        }
    }

    /// Update with the current queue fill and drift estimate. Returns the
    /// correction in samples to add to `nominal_chunk`.
    pub fn update(&mut self, fill_ratio: f64, drift_ppm: Option<f64>, nominal_chunk: f64) -> f64 {
        let fill_term = (fill_ratio - 0.5) * nominal_chunk * self.gain_fill;
        let drift_term = -drift_ppm.unwrap_or(0.0) * 1e-6 * nominal_chunk;
        let bound = self.limit * nominal_chunk;
        self.correction = (self.correction * 0.75 + (fill_term + drift_term) * 0.25).clamp(-bound, bound);
        self.correction
    }

    pub fn correction(&self) -> f64 {
        self.correction
    }

    pub fn reset(&mut self) {
        self.correction = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_receiver_running_fast() {
        let mut est = DriftEstimator::new();
        for i in 0..40 {
            let local = i as f64 * 0.1;
            // Receiver clock runs 100 ppm fast against the sender.
            let sender = 1_000.0 + local / (1.0 + 100e-6);
            est.observe(local, sender);
        }
        let ppm = est.drift_ppm().unwrap();
        assert!((ppm - 100.0).abs() < 0.5, "ppm {ppm}");
    }

    #[test]
    fn needs_span_before_estimating() {
        let mut est = DriftEstimator::new();
        for i in 0..20 {
            est.observe(i as f64 * 0.01, i as f64 * 0.01);
        }
        assert_eq!(est.drift_ppm(), None);
    }

    #[test]
    fn clock_steps_are_ignored() {
        let mut est = DriftEstimator::new();
        for i in 0..20 {
            let t = i as f64 * 0.2;
            est.observe(t, if i < 10 { t } else { t - 5.0 });
        }
        assert_eq!(est.drift_ppm(), None);
    }

    #[test]
    fn corrector_tracks_fill_and_clamps() {
        let mut rc = RateCorrector::new(0.01);
        let nominal = 2_400.0;
        assert_eq!(rc.update(0.5, None, nominal), 0.0);

        let first = rc.update(0.9, None, nominal);
        assert!(first > 0.0);
        let mut last = first;
        for _ in 0..50 {
            last = rc.update(1.0, None, nominal);
        }
        assert!((last - 24.0).abs() < 1e-9, "clamped at limit, got {last}");

        for _ in 0..50 {
            last = rc.update(0.0, None, nominal);
        }
        assert!((last + 24.0).abs() < 1e-9);
    }

    #[test]
    fn fast_receiver_reads_less() {
        let mut rc = RateCorrector::new(0.01);
        let mut c = 0.0;
        for _ in 0..50 {
            c = rc.update(0.5, Some(200.0), 10_000.0);
        }
        assert!((c + 2.0).abs() < 1e-3, "correction {c}");
    }

    #[test]
    fn rate_change_bumps_epoch_and_clears_drift() {
        let sync = ClockSync::new(48_000);
        for i in 0..20 {
            sync.observe_at(i as f64 * 0.2, i as f64 * 0.2);
        }
        assert!(sync.drift_ppm().is_some());
        sync.set_sample_rate(96_000);
        assert_eq!(sync.sample_rate(), 96_000);
        assert_eq!(sync.epoch(), 1);
        assert_eq!(sync.drift_ppm(), None);
    }
}
