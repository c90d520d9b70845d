// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! FEC-protected I/Q streaming over UDP.
//!
//! A stream is a sequence of frames. Each frame is `nb_original` fixed-size
//! super blocks (block 0 carries metadata, the rest carry samples) followed
//! by `nb_fec` Reed-Solomon recovery blocks, one block per datagram.

pub mod codec;
pub mod correction;
pub mod fec;
pub mod format;
pub mod framer;
pub mod log_limit;
pub mod pacer;
pub mod processor;
pub mod pull;
pub mod read_queue;
pub mod reassembly;
pub mod receiver;
pub mod sender;
pub mod source;
pub mod stats;

pub use codec::{BlockHeader, BlockPayload, CodecError, MetaDataFec, SuperBlock, DEFAULT_UDP_SIZE, HEADER_SIZE};
pub use correction::{ClockSync, DriftEstimator, RateCorrector};
pub use fec::{FecCodec, FecDescriptor, FecError, RecoveredBlock};
pub use format::SampleFormat;
pub use framer::{FramerSettings, TxFrame, TxFramer};
pub use pacer::{datagram_delay, PacedFrame, TxPacer};
pub use processor::{FecOutcome, FrameOutcome, FrameProcessor};
pub use pull::{NullSink, PullPacer, PullSettings, SampleSink};
pub use read_queue::{queue_size_for_rate, ReadQueue};
pub use reassembly::{frame_is_newer, FrameAccumulator, InsertOutcome, ReassemblyRing};
pub use receiver::{start_receiver, ReceiverCommand, ReceiverHandle, ReceiverSettings};
pub use sender::{spawn_sender, SenderCommand, SenderHandle, SenderSettings};
pub use source::{FileIqSource, IqSource, MockIqSource, ToneIqSource};
pub use stats::{SenderReport, SenderStats, StreamReport, StreamStats};
