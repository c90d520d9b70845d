// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Wire codec for protected super blocks.
//!
//! One UDP datagram carries one super block: an 8-byte header followed by a
//! fixed-size payload. Block 0 of every frame carries [`MetaDataFec`]; the
//! other original blocks carry interleaved I/Q sample bytes and blocks past
//! `nb_original_blocks` carry erasure-code recovery data.
//!
//! All multi-byte fields are little-endian.

use std::time::{SystemTime, UNIX_EPOCH};

use flate2::Crc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HEADER_SIZE: usize = 8;
pub const DEFAULT_UDP_SIZE: usize = 512;
pub const MIN_UDP_SIZE: usize = 64;
pub const MAX_UDP_SIZE: usize = 9000;
/// Frame may hold at most this many blocks, originals plus recovery.
pub const MAX_BLOCKS_PER_FRAME: usize = 256;
pub const MAX_ORIGINAL_BLOCKS: usize = 128;

/// Encoded metadata length inside the block 0 payload.
pub const META_SIZE: usize = 26;
/// Bytes covered by the metadata CRC.
pub const META_CRC_SPAN: usize = 20;
/// Bytes compared for stream-parameter equality (CRC region minus timestamp).
pub const META_EQ_SPAN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("datagram is {got} bytes, expected {expected}")]
    WrongSize { got: usize, expected: usize },
    #[error("datagram of {0} bytes is too short for a header")]
    TooShort(usize),
    #[error("payload of {0} bytes cannot hold metadata")]
    PayloadTooSmall(usize),
    #[error("metadata CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    MetaCrc { stored: u32, computed: u32 },
    #[error("unsupported sample width {0} bytes")]
    SampleWidth(u8),
    #[error("frame needs at least 2 original blocks, got {0}")]
    TooFewOriginals(u8),
}

/// Per-datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub frame_index: u16,
    pub block_index: u8,
    /// Low nibble: bytes per I or Q component. High nibble: flags.
    pub sample_bytes: u8,
    pub sample_bits: u8,
}

impl BlockHeader {
    pub fn sample_width(&self) -> u8 {
        self.sample_bytes & 0x0f
    }

    pub fn flags(&self) -> u8 {
        self.sample_bytes >> 4
    }

    pub fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.frame_index.to_le_bytes());
        out[2] = self.block_index;
        out[3] = self.sample_bytes;
        out[4] = self.sample_bits;
        out[5..HEADER_SIZE].fill(0);
    }

    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::TooShort(buf.len()));
        }
        Ok(Self {
            frame_index: u16::from_le_bytes([buf[0], buf[1]]),
            block_index: buf[2],
            sample_bytes: buf[3],
            sample_bits: buf[4],
        })
    }
}

/// One wire unit: header plus protected payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub header: BlockHeader,
    pub payload: Vec<u8>,
}

/// Interpretation of a super block payload.
#[derive(Debug, PartialEq)]
pub enum BlockPayload<'a> {
    Meta(MetaDataFec),
    /// Block 0 whose CRC did not verify. The stream is not synchronised.
    BadMeta(CodecError),
    Samples(&'a [u8]),
    Recovery(&'a [u8]),
}

impl<'a> BlockPayload<'a> {
    /// Classify block `index` of a frame with `nb_original` original blocks.
    pub fn classify(index: usize, payload: &'a [u8], nb_original: usize) -> Self {
        if index == 0 {
            match MetaDataFec::decode(payload) {
                Ok(meta) => Self::Meta(meta),
                Err(err) => Self::BadMeta(err),
            }
        } else if index < nb_original {
            Self::Samples(payload)
        } else {
            Self::Recovery(payload)
        }
    }
}

impl SuperBlock {
    /// Parse a datagram. Any length other than `udp_size` is a framing error.
    pub fn parse(datagram: &[u8], udp_size: usize) -> Result<Self, CodecError> {
        if datagram.len() != udp_size {
            return Err(CodecError::WrongSize {
                got: datagram.len(),
                expected: udp_size,
            });
        }
        let header = BlockHeader::read(datagram)?;
        Ok(Self {
            header,
            payload: datagram[HEADER_SIZE..].to_vec(),
        })
    }

    pub fn write_datagram(&self, out: &mut Vec<u8>) {
        out.clear();
        out.resize(HEADER_SIZE + self.payload.len(), 0);
        self.header.write(&mut out[..HEADER_SIZE]);
        out[HEADER_SIZE..].copy_from_slice(&self.payload);
    }

    pub fn to_datagram(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        self.write_datagram(&mut out);
        out
    }
}

/// Stream parameters carried in block 0 of every frame.
///
/// Equality ignores the timestamp and routing tags so that only a genuine
/// parameter change compares unequal.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetaDataFec {
    pub center_frequency_khz: u32,
    pub sample_rate: u32,
    pub sample_bytes: u8,
    pub sample_bits: u8,
    pub nb_original_blocks: u8,
    pub nb_fec_blocks: u8,
    pub tv_sec: u32,
    pub tv_usec: u32,
    pub device_index: u8,
    pub channel_index: u8,
}

impl PartialEq for MetaDataFec {
    fn eq(&self, other: &Self) -> bool {
        self.prefix() == other.prefix()
    }
}

impl Eq for MetaDataFec {}

impl MetaDataFec {
    fn prefix(&self) -> [u8; META_EQ_SPAN] {
        let mut buf = [0u8; META_SIZE];
        self.write_fields(&mut buf);
        let mut prefix = [0u8; META_EQ_SPAN];
        prefix.copy_from_slice(&buf[..META_EQ_SPAN]);
        prefix
    }

    fn write_fields(&self, out: &mut [u8; META_SIZE]) {
        out[0..4].copy_from_slice(&self.center_frequency_khz.to_le_bytes());
        out[4..8].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[8] = self.sample_bytes;
        out[9] = self.sample_bits;
        out[10] = self.nb_original_blocks;
        out[11] = self.nb_fec_blocks;
        out[12..16].copy_from_slice(&self.tv_sec.to_le_bytes());
        out[16..20].copy_from_slice(&self.tv_usec.to_le_bytes());
        let crc = meta_crc(&out[..META_CRC_SPAN]);
        out[20..24].copy_from_slice(&crc.to_le_bytes());
        out[24] = self.device_index;
        out[25] = self.channel_index;
    }

    /// Write the encoded metadata into `payload`, zeroing the remainder.
    pub fn encode(&self, payload: &mut [u8]) -> Result<(), CodecError> {
        if payload.len() < META_SIZE {
            return Err(CodecError::PayloadTooSmall(payload.len()));
        }
        let mut buf = [0u8; META_SIZE];
        self.write_fields(&mut buf);
        payload[..META_SIZE].copy_from_slice(&buf);
        payload[META_SIZE..].fill(0);
        Ok(())
    }

    /// Decode and CRC-check a block 0 payload.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() < META_SIZE {
            return Err(CodecError::PayloadTooSmall(payload.len()));
        }
        let stored = u32::from_le_bytes([payload[20], payload[21], payload[22], payload[23]]);
        let computed = meta_crc(&payload[..META_CRC_SPAN]);
        if stored != computed {
            return Err(CodecError::MetaCrc { stored, computed });
        }
        let u32_at = |at: usize| {
            u32::from_le_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]])
        };
        Ok(Self {
            center_frequency_khz: u32_at(0),
            sample_rate: u32_at(4),
            sample_bytes: payload[8],
            sample_bits: payload[9],
            nb_original_blocks: payload[10],
            nb_fec_blocks: payload[11],
            tv_sec: u32_at(12),
            tv_usec: u32_at(16),
            device_index: payload[24],
            channel_index: payload[25],
        })
    }

    /// Set the transmit timestamp to the current wall-clock time.
    pub fn stamp_now(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.tv_sec = now.as_secs() as u32;
        self.tv_usec = now.subsec_micros();
    }

    /// Transmit timestamp in seconds.
    pub fn timestamp(&self) -> f64 {
        self.tv_sec as f64 + self.tv_usec as f64 * 1e-6
    }

    /// Complex samples carried by one data block of `payload_size` bytes.
    pub fn samples_per_block(&self, payload_size: usize) -> usize {
        samples_per_block(payload_size, self.sample_bytes & 0x0f)
    }
}

pub fn samples_per_block(payload_size: usize, sample_bytes: u8) -> usize {
    match sample_bytes {
        0 => 0,
        b => payload_size / (2 * b as usize),
    }
}

fn meta_crc(bytes: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(bytes);
    crc.sum()
}
