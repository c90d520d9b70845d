// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Consumer side of the reassembly ring: FEC, metadata sync, read queue.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::codec::{BlockPayload, MetaDataFec, MAX_BLOCKS_PER_FRAME};
use crate::correction::ClockSync;
use crate::fec::{FecCodec, FecDescriptor};
use crate::format::SampleFormat;
use crate::log_limit::WarnLimiter;
use crate::read_queue::{queue_size_for_rate, ReadQueue};
use crate::reassembly::FrameAccumulator;
use crate::stats::StreamStats;

/// What FEC did for a forwarded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecOutcome {
    Intact,
    /// This many originals were rebuilt.
    Recovered(usize),
    /// This many originals could not be rebuilt and were zero-filled.
    Uncorrectable(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Fewer blocks than the unprotected minimum; dropped.
    Incomplete,
    /// Sample width in metadata or headers is not usable; dropped.
    BadFormat,
    Forwarded { fec: FecOutcome, queued: bool },
}

fn usable_geometry(meta: &MetaDataFec) -> bool {
    let nb_original = meta.nb_original_blocks as usize;
    nb_original >= 2 && nb_original + meta.nb_fec_blocks as usize <= MAX_BLOCKS_PER_FRAME
}

pub struct FrameProcessor {
    nb_original: usize,
    fec: FecCodec,
    queue: Arc<ReadQueue>,
    stats: Arc<StreamStats>,
    sync: Arc<ClockSync>,
    current: Option<MetaDataFec>,
    meta_tx: watch::Sender<Option<MetaDataFec>>,
    warn_frames: WarnLimiter,
    warn_meta: WarnLimiter,
}

impl FrameProcessor {
    /// `nb_original` is the fallback geometry used until metadata arrives.
    pub fn new(
        nb_original: usize,
        queue: Arc<ReadQueue>,
        stats: Arc<StreamStats>,
        sync: Arc<ClockSync>,
        meta_tx: watch::Sender<Option<MetaDataFec>>,
    ) -> Self {
        Self {
            nb_original,
            fec: FecCodec::new(),
            queue,
            stats,
            sync,
            current: None,
            meta_tx,
            warn_frames: WarnLimiter::new("frame dropped"),
            warn_meta: WarnLimiter::new("metadata rejected"),
        }
    }

    /// Currently adopted stream parameters.
    pub fn current_meta(&self) -> Option<MetaDataFec> {
        self.current
    }

    /// Frame geometry: the frame's own metadata, then the adopted metadata,
    /// then the configured block count with recovery inferred from the
    /// highest block index received.
    fn geometry(&self, frame: &FrameAccumulator) -> (usize, usize) {
        let own = match frame.payload(0, self.nb_original) {
            Some(BlockPayload::Meta(meta)) => Some(meta),
            _ => None,
        };
        own.filter(usable_geometry)
            .or(self.current.filter(usable_geometry))
            .map(|m| (m.nb_original_blocks as usize, m.nb_fec_blocks as usize))
            .unwrap_or_else(|| {
                let highest = frame.received().map(|(i, _)| i + 1).max().unwrap_or(0);
                (self.nb_original, highest.saturating_sub(self.nb_original))
            })
    }

    pub fn process(&mut self, mut frame: FrameAccumulator) -> FrameOutcome {
        StreamStats::add(&self.stats.frames_received, 1);

        let (nb_original, nb_fec) = self.geometry(&frame);
        let min_blocks = nb_original.saturating_sub(nb_fec);
        if frame.block_count() < min_blocks {
            StreamStats::add(&self.stats.frames_incomplete, 1);
            self.warn_frames.warn(&format!(
                "frame {} incomplete: {} of {} blocks",
                frame.frame_index(),
                frame.block_count(),
                min_blocks
            ));
            return FrameOutcome::Incomplete;
        }

        let payload_size = frame.received().next().map_or(0, |(_, data)| data.len());
        let original_count = frame.original_count(nb_original);
        let missing = nb_original - original_count;

        let fec = if missing == 0 {
            FecOutcome::Intact
        } else if original_count < min_blocks {
            let deficit = min_blocks - original_count;
            StreamStats::add(&self.stats.unrecoverable_errors, deficit as u64);
            self.warn_frames.warn(&format!(
                "frame {} uncorrectable: {} originals missing, {} recovery blocks",
                frame.frame_index(),
                missing,
                nb_fec
            ));
            FecOutcome::Uncorrectable(deficit)
        } else {
            let decoded = {
                let received: Vec<FecDescriptor<'_>> = frame
                    .received()
                    .map(|(index, data)| FecDescriptor { index, data })
                    .collect();
                self.fec.decode(nb_original, nb_fec, payload_size, &received)
            };
            match decoded {
                Ok(rebuilt) => {
                    for block in rebuilt {
                        frame.set_block(block.index, block.data);
                    }
                    StreamStats::add(&self.stats.recoverable_errors, missing as u64);
                    debug!("frame {}: recovered {} blocks", frame.frame_index(), missing);
                    FecOutcome::Recovered(missing)
                }
                Err(err) => {
                    let deficit = missing.saturating_sub(frame.recovery_count(nb_original));
                    StreamStats::add(&self.stats.unrecoverable_errors, deficit as u64);
                    self.warn_frames.warn(&format!(
                        "frame {} FEC decode failed: {}",
                        frame.frame_index(),
                        err
                    ));
                    FecOutcome::Uncorrectable(deficit)
                }
            }
        };

        if frame.meta_retrieved() {
            match frame.payload(0, nb_original) {
                Some(BlockPayload::Meta(meta)) => self.adopt(meta),
                Some(BlockPayload::BadMeta(err)) => {
                    StreamStats::add(&self.stats.crc_errors, 1);
                    self.warn_meta.warn(&format!("frame {}: {}", frame.frame_index(), err));
                }
                _ => {}
            }
        }

        let format = match self.current {
            Some(meta) => SampleFormat::new(meta.sample_bytes & 0x0f, meta.sample_bits),
            None => SampleFormat::new(frame.sample_bytes() & 0x0f, frame.sample_bits()),
        };
        let format = match format {
            Ok(format) => format,
            Err(err) => {
                self.warn_frames.warn(&format!("frame {}: {}", frame.frame_index(), err));
                return FrameOutcome::BadFormat;
            }
        };

        let block_bytes = payload_size / format.frame_bytes() * format.frame_bytes();
        let zeros = vec![0u8; payload_size];
        let mut samples =
            Vec::with_capacity(nb_original.saturating_sub(1) * block_bytes / format.frame_bytes());
        for index in 1..nb_original {
            let data = match frame.payload(index, nb_original) {
                Some(BlockPayload::Samples(data)) => data,
                _ => &zeros[..],
            };
            format.decode(&data[..block_bytes.min(data.len())], &mut samples);
        }

        let queued = self.queue.push(samples);
        if !queued {
            StreamStats::add(&self.stats.queue_overflows, 1);
            debug!("read queue full, frame {} dropped", frame.frame_index());
        }
        FrameOutcome::Forwarded { fec, queued }
    }

    fn adopt(&mut self, meta: MetaDataFec) {
        self.sync.observe(meta.timestamp());
        if self.current == Some(meta) {
            return;
        }
        let rate_changed = self.current.map(|m| m.sample_rate) != Some(meta.sample_rate);
        info!(
            "stream parameters: {} kHz, {} S/s, {}x{} bit, {}+{} blocks",
            meta.center_frequency_khz,
            meta.sample_rate,
            meta.sample_bytes & 0x0f,
            meta.sample_bits,
            meta.nb_original_blocks,
            meta.nb_fec_blocks
        );
        if rate_changed {
            self.queue.resize(queue_size_for_rate(meta.sample_rate));
            self.sync.set_sample_rate(meta.sample_rate);
        }
        self.current = Some(meta);
        self.stats.set_meta(meta);
        self.meta_tx.send_replace(Some(meta));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{SuperBlock, HEADER_SIZE};
    use crate::framer::tests::{ramp, settings};
    use crate::framer::{TxFrame, TxFramer};
    use crate::reassembly::ReassemblyRing;

    struct Rig {
        processor: FrameProcessor,
        queue: Arc<ReadQueue>,
        stats: Arc<StreamStats>,
        meta_rx: watch::Receiver<Option<MetaDataFec>>,
    }

    fn rig() -> Rig {
        let queue = Arc::new(ReadQueue::new(64));
        let stats = Arc::new(StreamStats::new());
        let sync = Arc::new(ClockSync::new(48_000));
        let (meta_tx, meta_rx) = watch::channel(None);
        Rig {
            processor: FrameProcessor::new(128, queue.clone(), stats.clone(), sync, meta_tx),
            queue,
            stats,
            meta_rx,
        }
    }

    fn assemble(frame: &TxFrame, dropped: &[usize]) -> FrameAccumulator {
        let mut ring = ReassemblyRing::new(1);
        for (i, datagram) in frame.datagrams.iter().enumerate() {
            if !dropped.contains(&i) {
                ring.insert(SuperBlock::parse(datagram, 512).unwrap());
            }
        }
        ring.drain().pop().unwrap()
    }

    fn frame_with(nb_fec: u8, rate: u32) -> (TxFrame, Vec<num_complex::Complex<f32>>) {
        let mut cfg = settings(128, nb_fec);
        cfg.sample_rate = rate;
        let mut framer = TxFramer::new(cfg).unwrap();
        let samples = ramp(framer.samples_per_frame());
        (framer.build_frame(&samples).unwrap(), samples)
    }

    fn drain(queue: &ReadQueue, len: usize) -> Vec<num_complex::Complex<f32>> {
        let mut out = vec![Default::default(); len];
        assert_eq!(queue.read_into(&mut out), len);
        out
    }

    #[test]
    fn losses_within_budget_are_rebuilt_exactly() {
        let mut rig = rig();
        let (frame, samples) = frame_with(16, 48_000);
        let acc = assemble(&frame, &[3, 40, 100, 127]);

        let outcome = rig.processor.process(acc);
        assert_eq!(
            outcome,
            FrameOutcome::Forwarded {
                fec: FecOutcome::Recovered(4),
                queued: true
            }
        );
        assert_eq!(rig.stats.snapshot(&rig.queue).recoverable_errors, 4);
        assert_eq!(rig.stats.snapshot(&rig.queue).unrecoverable_errors, 0);

        // Queue was resized for 48 kS/s on adoption; fill past half to read.
        for _ in 0..9 {
            let (f, _) = frame_with(16, 48_000);
            rig.processor.process(assemble(&f, &[]));
        }
        let out = drain(&rig.queue, samples.len());
        for (a, b) in samples.iter().zip(&out) {
            assert!((a - b).norm() < 1e-4);
        }
    }

    #[test]
    fn losses_beyond_budget_count_the_deficit() {
        let mut rig = rig();
        let (frame, _) = frame_with(16, 48_000);
        let dropped: Vec<usize> = (20..40).collect();
        let acc = assemble(&frame, &dropped);

        let outcome = rig.processor.process(acc);
        assert_eq!(
            outcome,
            FrameOutcome::Forwarded {
                fec: FecOutcome::Uncorrectable(4),
                queued: true
            }
        );
        let report = rig.stats.snapshot(&rig.queue);
        assert_eq!(report.unrecoverable_errors, 4);
        assert_eq!(report.recoverable_errors, 0);
        assert_eq!(report.frames_incomplete, 0);
        assert_eq!(rig.queue.length(), 1);
    }

    #[test]
    fn missing_recovery_blocks_fail_decode() {
        let mut rig = rig();
        let (frame, _) = frame_with(16, 48_000);
        // 10 originals lost, only 6 recovery blocks arrive.
        let mut dropped: Vec<usize> = (50..60).collect();
        dropped.extend(128..138);
        let outcome = rig.processor.process(assemble(&frame, &dropped));
        assert_eq!(
            outcome,
            FrameOutcome::Forwarded {
                fec: FecOutcome::Uncorrectable(4),
                queued: true
            }
        );
        assert_eq!(rig.stats.snapshot(&rig.queue).unrecoverable_errors, 4);
    }

    #[test]
    fn sparse_frame_is_incomplete() {
        let mut rig = rig();
        let (frame, _) = frame_with(0, 48_000);
        let dropped: Vec<usize> = (1..100).collect();
        assert_eq!(
            rig.processor.process(assemble(&frame, &dropped)),
            FrameOutcome::Incomplete
        );
        let report = rig.stats.snapshot(&rig.queue);
        assert_eq!(report.frames_incomplete, 1);
        assert_eq!(report.unrecoverable_errors, 0);
        assert_eq!(rig.queue.length(), 0);
    }

    #[test]
    fn corrupt_metadata_keeps_prior_parameters() {
        let mut rig = rig();
        let (good, _) = frame_with(8, 48_000);
        rig.processor.process(assemble(&good, &[]));
        assert_eq!(rig.processor.current_meta().unwrap().sample_rate, 48_000);

        let (mut bad, _) = frame_with(8, 96_000);
        bad.datagrams[0][HEADER_SIZE + 5] ^= 0x40;
        rig.processor.process(assemble(&bad, &[]));

        assert_eq!(rig.stats.snapshot(&rig.queue).crc_errors, 1);
        let meta = rig.processor.current_meta().unwrap();
        assert_eq!(meta.sample_rate, 48_000);
        assert_eq!(meta.center_frequency_khz, 435_000);
        assert_eq!(rig.meta_rx.borrow().unwrap().sample_rate, 48_000);
    }

    #[test]
    fn rate_change_resizes_queue() {
        let mut rig = rig();
        let (first, _) = frame_with(0, 48_000);
        rig.processor.process(assemble(&first, &[]));
        assert_eq!(rig.queue.size(), 20);

        let (second, _) = frame_with(0, 96_000);
        rig.processor.process(assemble(&second, &[]));
        assert_eq!(rig.queue.size(), 40);
        assert_eq!(rig.queue.length(), 1);
        assert!(rig.meta_rx.has_changed().unwrap());
    }

    #[test]
    fn metadata_rebuilt_by_fec_is_adopted() {
        let mut rig = rig();
        let (frame, _) = frame_with(4, 48_000);
        rig.processor.process(assemble(&frame, &[0]));
        assert_eq!(rig.processor.current_meta().unwrap().nb_fec_blocks, 4);
        assert_eq!(rig.stats.snapshot(&rig.queue).recoverable_errors, 1);
    }
}
