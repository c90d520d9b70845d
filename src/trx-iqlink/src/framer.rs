// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Transmit framer: I/Q samples in, protected datagrams out.

use std::time::Duration;

use num_complex::Complex;
use tracing::warn;

use crate::codec::{BlockHeader, CodecError, MetaDataFec, HEADER_SIZE, META_SIZE};
use crate::fec::FecCodec;
use crate::format::SampleFormat;

#[derive(Debug, Clone)]
pub struct FramerSettings {
    pub udp_size: usize,
    pub format: SampleFormat,
    pub nb_original: u8,
    pub nb_fec: u8,
    pub center_frequency_khz: u32,
    pub sample_rate: u32,
    pub device_index: u8,
    pub channel_index: u8,
}

/// One frame worth of datagrams, in transmit order.
#[derive(Debug, Clone)]
pub struct TxFrame {
    pub frame_index: u16,
    pub datagrams: Vec<Vec<u8>>,
    /// Recovery blocks actually carried; 0 after an encoder fallback.
    pub nb_fec: u8,
    pub fec_fallback: bool,
}

pub struct TxFramer {
    settings: FramerSettings,
    fec: FecCodec,
    frame_index: u16,
    pending: Vec<Complex<f32>>,
}

impl TxFramer {
    pub fn new(settings: FramerSettings) -> Result<Self, CodecError> {
        let payload = settings.udp_size.saturating_sub(HEADER_SIZE);
        if payload < META_SIZE {
            return Err(CodecError::PayloadTooSmall(payload));
        }
        if settings.nb_original < 2 {
            return Err(CodecError::TooFewOriginals(settings.nb_original));
        }
        SampleFormat::new(settings.format.bytes, settings.format.bits)?;
        Ok(Self {
            settings,
            fec: FecCodec::new(),
            frame_index: 0,
            pending: Vec::new(),
        })
    }

    pub fn settings(&self) -> &FramerSettings {
        &self.settings
    }

    pub fn payload_size(&self) -> usize {
        self.settings.udp_size - HEADER_SIZE
    }

    pub fn samples_per_block(&self) -> usize {
        self.payload_size() / self.settings.format.frame_bytes()
    }

    /// Samples carried by one frame; block 0 holds metadata only.
    pub fn samples_per_frame(&self) -> usize {
        (self.settings.nb_original as usize).saturating_sub(1) * self.samples_per_block()
    }

    /// Wall-clock span of one frame at the current sample rate.
    pub fn frame_duration(&self) -> Duration {
        let rate = self.settings.sample_rate.max(1) as f64;
        Duration::from_secs_f64(self.samples_per_frame() as f64 / rate)
    }

    pub fn set_fec_blocks(&mut self, nb_fec: u8) {
        self.settings.nb_fec = nb_fec;
    }

    pub fn set_center_frequency(&mut self, khz: u32) {
        self.settings.center_frequency_khz = khz;
    }

    /// Change the announced rate. Samples already buffered are dropped.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.settings.sample_rate = sample_rate;
        self.pending.clear();
    }

    pub fn next_frame_index(&self) -> u16 {
        self.frame_index
    }

    fn meta(&self) -> MetaDataFec {
        MetaDataFec {
            center_frequency_khz: self.settings.center_frequency_khz,
            sample_rate: self.settings.sample_rate,
            sample_bytes: self.settings.format.bytes,
            sample_bits: self.settings.format.bits,
            nb_original_blocks: self.settings.nb_original,
            nb_fec_blocks: self.settings.nb_fec,
            tv_sec: 0,
            tv_usec: 0,
            device_index: self.settings.device_index,
            channel_index: self.settings.channel_index,
        }
    }

    /// Buffer `samples` and return every frame they complete.
    pub fn push(&mut self, samples: &[Complex<f32>]) -> Result<Vec<TxFrame>, CodecError> {
        self.pending.extend_from_slice(samples);
        let per_frame = self.samples_per_frame().max(1);
        let mut frames = Vec::new();
        while self.pending.len() >= per_frame {
            let chunk: Vec<Complex<f32>> = self.pending.drain(..per_frame).collect();
            frames.push(self.build_frame(&chunk)?);
        }
        Ok(frames)
    }

    /// Build one frame from `samples` (zero-padded to a full frame).
    pub fn build_frame(&mut self, samples: &[Complex<f32>]) -> Result<TxFrame, CodecError> {
        let payload = self.payload_size();
        let nb_original = self.settings.nb_original as usize;
        let format = self.settings.format;
        let spb = self.samples_per_block();

        let mut meta = self.meta();
        meta.stamp_now();
        let mut originals = vec![vec![0u8; payload]; nb_original];
        meta.encode(&mut originals[0])?;
        for (block, chunk) in originals[1..]
            .iter_mut()
            .zip(samples.chunks(spb.max(1)))
        {
            format.encode(chunk, &mut block[..chunk.len() * format.frame_bytes()]);
        }

        let mut nb_fec = self.settings.nb_fec;
        let mut fec_fallback = false;
        let recovery = match self.fec.encode(&originals, nb_fec as usize) {
            Ok(recovery) => recovery,
            Err(err) => {
                warn!(
                    "FEC encode failed for frame {}, sending without recovery: {}",
                    self.frame_index, err
                );
                nb_fec = 0;
                fec_fallback = true;
                meta.nb_fec_blocks = 0;
                meta.encode(&mut originals[0])?;
                Vec::new()
            }
        };

        let frame_index = self.frame_index;
        let datagrams = originals
            .iter()
            .chain(recovery.iter())
            .enumerate()
            .map(|(index, data)| {
                let header = BlockHeader {
                    frame_index,
                    block_index: index as u8,
                    sample_bytes: format.bytes,
                    sample_bits: format.bits,
                };
                let mut datagram = vec![0u8; HEADER_SIZE + payload];
                header.write(&mut datagram[..HEADER_SIZE]);
                datagram[HEADER_SIZE..].copy_from_slice(data);
                datagram
            })
            .collect();
        self.frame_index = self.frame_index.wrapping_add(1);

        Ok(TxFrame {
            frame_index,
            datagrams,
            nb_fec,
            fec_fallback,
        })
    }
}
