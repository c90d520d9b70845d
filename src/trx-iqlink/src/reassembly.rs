// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Receive-side frame reassembly.
//!
//! A small ring of slots, indexed by `frame_index % slots`, accumulates the
//! blocks of in-flight frames. A slot is handed downstream only when a newer
//! frame claims it, so the ring depth bounds how far frames may be reordered.

use std::cmp::Reverse;

use crate::codec::{BlockPayload, SuperBlock, MAX_BLOCKS_PER_FRAME};

/// `true` when frame index `a` is newer than `b` under 16-bit wraparound.
pub fn frame_is_newer(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

/// Blocks collected for one frame index.
#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    frame_index: u16,
    blocks: Vec<Option<Vec<u8>>>,
    block_count: usize,
    meta_retrieved: bool,
    sample_bytes: u8,
    sample_bits: u8,
}

impl FrameAccumulator {
    fn new(block: &SuperBlock) -> Self {
        Self {
            frame_index: block.header.frame_index,
            blocks: vec![None; MAX_BLOCKS_PER_FRAME],
            block_count: 0,
            meta_retrieved: false,
            sample_bytes: block.header.sample_bytes,
            sample_bits: block.header.sample_bits,
        }
    }

    /// Store a block. Returns `false` for a duplicate.
    fn merge(&mut self, block: SuperBlock) -> bool {
        let index = block.header.block_index as usize;
        let slot = &mut self.blocks[index];
        if slot.is_some() {
            return false;
        }
        *slot = Some(block.payload);
        self.block_count += 1;
        if index == 0 {
            self.meta_retrieved = true;
        }
        true
    }

    pub fn frame_index(&self) -> u16 {
        self.frame_index
    }

    /// All blocks received, originals and recovery.
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn meta_retrieved(&self) -> bool {
        self.meta_retrieved
    }

    /// Blocks received with index below `nb_original`.
    pub fn original_count(&self, nb_original: usize) -> usize {
        self.blocks[..nb_original.min(MAX_BLOCKS_PER_FRAME)]
            .iter()
            .filter(|b| b.is_some())
            .count()
    }

    /// Blocks received with index at or above `nb_original`.
    pub fn recovery_count(&self, nb_original: usize) -> usize {
        self.block_count - self.original_count(nb_original)
    }

    pub fn block(&self, index: usize) -> Option<&[u8]> {
        self.blocks.get(index).and_then(|b| b.as_deref())
    }

    /// Received block `index`, classified for a frame of `nb_original`.
    pub fn payload(&self, index: usize, nb_original: usize) -> Option<BlockPayload<'_>> {
        self.block(index)
            .map(|data| BlockPayload::classify(index, data, nb_original))
    }

    /// Iterate `(index, payload)` over received blocks.
    pub fn received(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.blocks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_deref().map(|data| (i, data)))
    }

    pub fn set_block(&mut self, index: usize, data: Vec<u8>) {
        if let Some(slot) = self.blocks.get_mut(index) {
            if slot.is_none() {
                self.block_count += 1;
            }
            *slot = Some(data);
            if index == 0 {
                self.meta_retrieved = true;
            }
        }
    }

    /// Header sample width of the first block that opened this frame.
    pub fn sample_bytes(&self) -> u8 {
        self.sample_bytes
    }

    pub fn sample_bits(&self) -> u8 {
        self.sample_bits
    }
}

#[derive(Debug, Clone, Default)]
pub enum SlotState {
    #[default]
    Empty,
    Accumulating(FrameAccumulator),
}

/// Result of inserting one block into the ring.
#[derive(Debug)]
pub enum InsertOutcome {
    /// Slot was empty; a new frame started.
    Started,
    /// Added to the frame already bound to the slot.
    Merged,
    /// Same block index already held.
    Duplicate,
    /// A newer frame claimed the slot; the previous frame is ready.
    Flushed(FrameAccumulator),
    /// Block belongs to a frame older than the slot's binding; dropped.
    Late,
}

pub struct ReassemblyRing {
    slots: Vec<SlotState>,
}

impl ReassemblyRing {
    /// `slots` is rounded up to a power of two so slot assignment stays
    /// consistent across the 16-bit frame index wrap.
    pub fn new(slots: usize) -> Self {
        let slots = slots.clamp(1, MAX_BLOCKS_PER_FRAME).next_power_of_two();
        Self {
            slots: vec![SlotState::Empty; slots],
        }
    }

    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    fn slot_of(&self, frame_index: u16) -> usize {
        frame_index as usize & (self.slots.len() - 1)
    }

    pub fn insert(&mut self, block: SuperBlock) -> InsertOutcome {
        let index = self.slot_of(block.header.frame_index);
        let slot = &mut self.slots[index];
        match slot {
            SlotState::Empty => {
                let mut acc = FrameAccumulator::new(&block);
                acc.merge(block);
                *slot = SlotState::Accumulating(acc);
                InsertOutcome::Started
            }
            SlotState::Accumulating(acc) if acc.frame_index == block.header.frame_index => {
                if acc.merge(block) {
                    InsertOutcome::Merged
                } else {
                    InsertOutcome::Duplicate
                }
            }
            SlotState::Accumulating(acc) => {
                if !frame_is_newer(block.header.frame_index, acc.frame_index) {
                    return InsertOutcome::Late;
                }
                let mut fresh = FrameAccumulator::new(&block);
                fresh.merge(block);
                let previous = std::mem::replace(acc, fresh);
                InsertOutcome::Flushed(previous)
            }
        }
    }

    /// Empty every slot, returning pending frames oldest first.
    pub fn drain(&mut self) -> Vec<FrameAccumulator> {
        let mut frames: Vec<FrameAccumulator> = self
            .slots
            .iter_mut()
            .filter_map(|slot| match std::mem::take(slot) {
                SlotState::Accumulating(acc) => Some(acc),
                SlotState::Empty => None,
            })
            .collect();
        if let Some(newest) = frames.iter().map(|f| f.frame_index).reduce(|a, b| {
            if frame_is_newer(b, a) {
                b
            } else {
                a
            }
        }) {
            frames.sort_by_key(|f| Reverse(newest.wrapping_sub(f.frame_index)));
        }
        frames
    }
}
