// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Systematic Reed-Solomon erasure coding over GF(2^8).
//!
//! A frame is `nb_original` payload-sized blocks followed by `nb_fec`
//! recovery blocks. Any `nb_original` of them rebuild the rest.
//!
//! Recovery row `r` of the generator matrix does not depend on how many
//! recovery blocks were produced, so a decoder may size its codec from the
//! highest recovery index it actually received.

use std::collections::HashMap;

use reed_solomon_erasure::galois_8::ReedSolomon;
use thiserror::Error;

use crate::codec::MAX_BLOCKS_PER_FRAME;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FecError {
    #[error("invalid FEC geometry: {original} original + {recovery} recovery blocks")]
    InvalidGeometry { original: usize, recovery: usize },
    #[error("only {have} of {need} blocks available")]
    TooFewBlocks { have: usize, need: usize },
    #[error("block {index} is {got} bytes, expected {expected}")]
    BlockSize {
        index: usize,
        got: usize,
        expected: usize,
    },
    #[error("reed-solomon: {0:?}")]
    Codec(reed_solomon_erasure::Error),
}

/// One received block handed to the decoder.
#[derive(Debug, Clone, Copy)]
pub struct FecDescriptor<'a> {
    /// Position in the frame, originals first.
    pub index: usize,
    pub data: &'a [u8],
}

/// An original block rebuilt by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredBlock {
    pub index: usize,
    pub data: Vec<u8>,
}

/// Reed-Solomon encoder/decoder with a cache of codec instances per geometry.
#[derive(Default)]
pub struct FecCodec {
    cache: HashMap<(usize, usize), ReedSolomon>,
}

impl FecCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn codec(&mut self, original: usize, recovery: usize) -> Result<&ReedSolomon, FecError> {
        if original == 0 || recovery == 0 || original + recovery > MAX_BLOCKS_PER_FRAME {
            return Err(FecError::InvalidGeometry { original, recovery });
        }
        if !self.cache.contains_key(&(original, recovery)) {
            let rs = ReedSolomon::new(original, recovery).map_err(FecError::Codec)?;
            self.cache.insert((original, recovery), rs);
        }
        self.cache
            .get(&(original, recovery))
            .ok_or(FecError::InvalidGeometry { original, recovery })
    }

    /// Produce `nb_fec` recovery blocks for `originals`. Deterministic.
    pub fn encode<B: AsRef<[u8]>>(
        &mut self,
        originals: &[B],
        nb_fec: usize,
    ) -> Result<Vec<Vec<u8>>, FecError> {
        if nb_fec == 0 {
            return Ok(Vec::new());
        }
        let block_size = originals.first().map_or(0, |b| b.as_ref().len());
        for (index, block) in originals.iter().enumerate() {
            let got = block.as_ref().len();
            if got != block_size {
                return Err(FecError::BlockSize {
                    index,
                    got,
                    expected: block_size,
                });
            }
        }
        let rs = self.codec(originals.len(), nb_fec)?;
        let data: Vec<&[u8]> = originals.iter().map(AsRef::as_ref).collect();
        let mut parity = vec![vec![0u8; block_size]; nb_fec];
        rs.encode_sep(&data, &mut parity).map_err(FecError::Codec)?;
        Ok(parity)
    }

    /// Rebuild the missing originals of a frame from the blocks that arrived.
    ///
    /// `received` lists every block that arrived, originals and recovery.
    /// Returns the rebuilt originals; empty when none were missing.
    pub fn decode(
        &mut self,
        nb_original: usize,
        nb_fec: usize,
        block_size: usize,
        received: &[FecDescriptor<'_>],
    ) -> Result<Vec<RecoveredBlock>, FecError> {
        let highest_recovery = received
            .iter()
            .filter(|d| d.index >= nb_original)
            .map(|d| d.index - nb_original + 1)
            .max()
            .unwrap_or(0);
        let recovery = nb_fec.max(highest_recovery);
        let total = nb_original + recovery;

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut have = 0;
        for desc in received {
            if desc.data.len() != block_size {
                return Err(FecError::BlockSize {
                    index: desc.index,
                    got: desc.data.len(),
                    expected: block_size,
                });
            }
            if let Some(slot) = shards.get_mut(desc.index) {
                if slot.is_none() {
                    *slot = Some(desc.data.to_vec());
                    have += 1;
                }
            }
        }

        let missing: Vec<usize> = (0..nb_original).filter(|&i| shards[i].is_none()).collect();
        if missing.is_empty() {
            return Ok(Vec::new());
        }
        if have < nb_original {
            return Err(FecError::TooFewBlocks {
                have,
                need: nb_original,
            });
        }

        let rs = self.codec(nb_original, recovery)?;
        rs.reconstruct_data(&mut shards).map_err(FecError::Codec)?;

        Ok(missing
            .into_iter()
            .filter_map(|index| {
                shards[index]
                    .take()
                    .map(|data| RecoveredBlock { index, data })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 504;

    fn frame(nb_original: usize) -> Vec<Vec<u8>> {
        (0..nb_original)
            .map(|b| {
                (0..BLOCK)
                    .map(|i| ((b * 31 + i * 7) ^ (i >> 3)) as u8)
                    .collect()
            })
            .collect()
    }

    fn descriptors<'a>(
        originals: &'a [Vec<u8>],
        recovery: &'a [Vec<u8>],
        dropped: &[usize],
    ) -> Vec<FecDescriptor<'a>> {
        originals
            .iter()
            .chain(recovery.iter())
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(index, data)| FecDescriptor { index, data })
            .collect()
    }

    #[test]
    fn rebuilds_dropped_originals() {
        let mut fec = FecCodec::new();
        let originals = frame(128);
        let recovery = fec.encode(&originals, 16).unwrap();
        assert_eq!(recovery.len(), 16);

        let dropped = [3, 40, 100, 127];
        let received = descriptors(&originals, &recovery, &dropped);
        let rebuilt = fec.decode(128, 16, BLOCK, &received).unwrap();

        assert_eq!(rebuilt.len(), dropped.len());
        for block in rebuilt {
            assert!(dropped.contains(&block.index));
            assert_eq!(block.data, originals[block.index]);
        }
    }

    #[test]
    fn nothing_missing_skips_decode() {
        let mut fec = FecCodec::new();
        let originals = frame(16);
        let recovery = fec.encode(&originals, 4).unwrap();
        let received = descriptors(&originals, &recovery, &[]);
        assert!(fec.decode(16, 4, BLOCK, &received).unwrap().is_empty());
    }

    #[test]
    fn too_many_losses_fail() {
        let mut fec = FecCodec::new();
        let originals = frame(128);
        let recovery = fec.encode(&originals, 16).unwrap();
        let dropped: Vec<usize> = (10..30).collect();
        let received = descriptors(&originals, &recovery, &dropped);
        assert_eq!(
            fec.decode(128, 16, BLOCK, &received).unwrap_err(),
            FecError::TooFewBlocks {
                have: 124,
                need: 128
            }
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let originals = frame(32);
        let a = FecCodec::new().encode(&originals, 8).unwrap();
        let b = FecCodec::new().encode(&originals, 8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn recovery_rows_are_prefix_stable() {
        let mut fec = FecCodec::new();
        let originals = frame(64);
        let eight = fec.encode(&originals, 8).unwrap();
        let sixteen = fec.encode(&originals, 16).unwrap();
        assert_eq!(eight[..], sixteen[..8]);
    }

    #[test]
    fn decoder_sizes_codec_from_received_indices() {
        let mut fec = FecCodec::new();
        let originals = frame(32);
        let recovery = fec.encode(&originals, 8).unwrap();
        // Decoder told nothing about recovery; indices alone tell it enough.
        let received = descriptors(&originals, &recovery, &[0, 1, 2, 3, 4, 5]);
        let rebuilt = fec.decode(32, 0, BLOCK, &received).unwrap();
        assert_eq!(rebuilt.len(), 6);
        for block in rebuilt {
            assert_eq!(block.data, originals[block.index]);
        }
    }

    #[test]
    fn zero_recovery_encodes_nothing() {
        let mut fec = FecCodec::new();
        assert!(fec.encode(&frame(8), 0).unwrap().is_empty());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut fec = FecCodec::new();
        let err = fec.encode(&frame(128), 200).unwrap_err();
        assert_eq!(
            err,
            FecError::InvalidGeometry {
                original: 128,
                recovery: 200
            }
        );
    }
}
