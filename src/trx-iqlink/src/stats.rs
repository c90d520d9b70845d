// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Stream counters and report snapshots.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::codec::MetaDataFec;
use crate::read_queue::ReadQueue;

/// Cumulative receive-side counters. Monotonic until [`StreamStats::reset`].
#[derive(Debug, Default)]
pub struct StreamStats {
    pub frames_received: AtomicU64,
    pub frames_incomplete: AtomicU64,
    pub recoverable_errors: AtomicU64,
    pub unrecoverable_errors: AtomicU64,
    pub crc_errors: AtomicU64,
    pub size_errors: AtomicU64,
    pub late_blocks: AtomicU64,
    pub queue_overflows: AtomicU64,
    /// Frames the socket task dropped because the processor fell behind.
    pub processor_drops: AtomicU64,
    /// Current pull correction in millisamples per tick.
    correction_milli: AtomicI64,
    meta: Mutex<Option<MetaDataFec>>,
}

/// Serialisable snapshot of the receive side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamReport {
    pub frames_received: u64,
    pub frames_incomplete: u64,
    pub recoverable_errors: u64,
    pub unrecoverable_errors: u64,
    pub crc_errors: u64,
    pub size_errors: u64,
    pub late_blocks: u64,
    pub queue_overflows: u64,
    pub processor_drops: u64,
    pub queue_length: usize,
    pub queue_size: usize,
    pub samples_read: u64,
    pub meta: Option<MetaDataFec>,
    pub nb_fec_blocks: u8,
    pub correction: f64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_meta(&self, meta: MetaDataFec) {
        *self.meta.lock().unwrap_or_else(|e| e.into_inner()) = Some(meta);
    }

    pub fn meta(&self) -> Option<MetaDataFec> {
        *self.meta.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_correction(&self, samples: f64) {
        self.correction_milli
            .store((samples * 1000.0).round() as i64, Ordering::Relaxed);
    }

    pub fn correction(&self) -> f64 {
        self.correction_milli.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn reset(&self) {
        for counter in [
            &self.frames_received,
            &self.frames_incomplete,
            &self.recoverable_errors,
            &self.unrecoverable_errors,
            &self.crc_errors,
            &self.size_errors,
            &self.late_blocks,
            &self.queue_overflows,
            &self.processor_drops,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, queue: &ReadQueue) -> StreamReport {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let meta = self.meta();
        StreamReport {
            frames_received: load(&self.frames_received),
            frames_incomplete: load(&self.frames_incomplete),
            recoverable_errors: load(&self.recoverable_errors),
            unrecoverable_errors: load(&self.unrecoverable_errors),
            crc_errors: load(&self.crc_errors),
            size_errors: load(&self.size_errors),
            late_blocks: load(&self.late_blocks),
            queue_overflows: load(&self.queue_overflows),
            processor_drops: load(&self.processor_drops),
            queue_length: queue.length(),
            queue_size: queue.size(),
            samples_read: queue.samples_read(),
            nb_fec_blocks: meta.map_or(0, |m| m.nb_fec_blocks),
            meta,
            correction: self.correction(),
        }
    }
}

/// Transmit-side counters.
#[derive(Debug, Default)]
pub struct SenderStats {
    pub frames_built: AtomicU64,
    pub datagrams_sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub fec_fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderReport {
    pub frames_built: u64,
    pub datagrams_sent: u64,
    pub send_errors: u64,
    pub fec_fallbacks: u64,
}

impl SenderStats {
    pub fn snapshot(&self) -> SenderReport {
        SenderReport {
            frames_built: self.frames_built.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            fec_fallbacks: self.fec_fallbacks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters_and_queue() {
        let stats = StreamStats::new();
        let queue = ReadQueue::new(4);
        queue.push(vec![Default::default(); 8]);
        StreamStats::add(&stats.recoverable_errors, 4);
        StreamStats::add(&stats.unrecoverable_errors, 2);
        stats.set_correction(-1.25);
        stats.set_meta(MetaDataFec {
            nb_fec_blocks: 16,
            ..Default::default()
        });

        let report = stats.snapshot(&queue);
        assert_eq!(report.recoverable_errors, 4);
        assert_eq!(report.unrecoverable_errors, 2);
        assert_eq!(report.queue_length, 1);
        assert_eq!(report.queue_size, 4);
        assert_eq!(report.nb_fec_blocks, 16);
        assert_eq!(report.correction, -1.25);

        stats.reset();
        let report = stats.snapshot(&queue);
        assert_eq!(report.recoverable_errors, 0);
        assert_eq!(report.nb_fec_blocks, 16);
    }
}
