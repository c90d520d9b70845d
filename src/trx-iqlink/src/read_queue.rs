// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Elastic queue between the network path and the sample consumer.
//!
//! The producer pushes whole decoded frames; the consumer pulls samples one
//! at a time or in blocks. Reads return silence until the queue has filled to
//! half its capacity, and again after it runs dry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use num_complex::Complex;

const ZERO: Complex<f32> = Complex::new(0.0, 0.0);

/// Queue capacity in frames for `sample_rate`: about 20 frames at 48 kS/s,
/// rounded down to an even count, never below 2.
pub fn queue_size_for_rate(sample_rate: u32) -> usize {
    let frames = (sample_rate / 2400) as usize;
    (frames & !1).max(2)
}

struct Inner {
    frames: VecDeque<Vec<Complex<f32>>>,
    capacity: usize,
    /// Read position inside the front frame.
    cursor: usize,
    replete: bool,
}

impl Inner {
    fn next(&mut self) -> Option<Complex<f32>> {
        if !self.replete {
            if self.frames.len() * 2 < self.capacity || self.frames.is_empty() {
                return None;
            }
            self.replete = true;
        }
        loop {
            let front = match self.frames.front() {
                Some(front) => front,
                None => {
                    self.replete = false;
                    return None;
                }
            };
            if let Some(&sample) = front.get(self.cursor) {
                self.cursor += 1;
                return Some(sample);
            }
            self.frames.pop_front();
            self.cursor = 0;
        }
    }
}

pub struct ReadQueue {
    inner: Mutex<Inner>,
    samples_read: AtomicU64,
}

impl ReadQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                capacity: capacity.max(2),
                cursor: 0,
                replete: false,
            }),
            samples_read: AtomicU64::new(0),
        }
    }

    pub fn for_sample_rate(sample_rate: u32) -> Self {
        Self::new(queue_size_for_rate(sample_rate))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame. Returns `false`, leaving the queue untouched, when full.
    pub fn push(&self, frame: Vec<Complex<f32>>) -> bool {
        let mut inner = self.lock();
        if inner.frames.len() >= inner.capacity {
            return false;
        }
        inner.frames.push_back(frame);
        true
    }

    /// Next sample, or zero while the queue is refilling.
    pub fn read_sample(&self) -> Complex<f32> {
        match self.lock().next() {
            Some(sample) => {
                self.samples_read.fetch_add(1, Ordering::Relaxed);
                sample
            }
            None => ZERO,
        }
    }

    /// Fill `out`, zero-padding whatever the queue cannot supply. Returns the
    /// number of real samples copied.
    pub fn read_into(&self, out: &mut [Complex<f32>]) -> usize {
        let mut inner = self.lock();
        let mut copied = 0;
        for slot in out.iter_mut() {
            match inner.next() {
                Some(sample) => {
                    *slot = sample;
                    copied += 1;
                }
                None => *slot = ZERO,
            }
        }
        drop(inner);
        self.samples_read.fetch_add(copied as u64, Ordering::Relaxed);
        copied
    }

    /// Frames currently queued.
    pub fn length(&self) -> usize {
        self.lock().frames.len()
    }

    /// Capacity in frames.
    pub fn size(&self) -> usize {
        self.lock().capacity
    }

    pub fn samples_read(&self) -> u64 {
        self.samples_read.load(Ordering::Relaxed)
    }

    pub fn fill_ratio(&self) -> f64 {
        let inner = self.lock();
        inner.frames.len() as f64 / inner.capacity as f64
    }

    /// Change capacity. Queued data is discarded.
    pub fn resize(&self, capacity: usize) {
        let mut inner = self.lock();
        inner.capacity = capacity.max(2);
        inner.frames.clear();
        inner.cursor = 0;
        inner.replete = false;
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.frames.clear();
        inner.cursor = 0;
        inner.replete = false;
    }
}
