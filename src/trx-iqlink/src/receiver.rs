// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Receive pipeline: UDP -> reassembly ring -> FEC -> read queue.
//!
//! The socket task is the only writer of the reassembly ring. Flushed frames
//! go over a channel to the processor task, which also serves
//! [`ReceiverCommand`]s.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::codec::{MetaDataFec, SuperBlock, MAX_UDP_SIZE};
use crate::correction::ClockSync;
use crate::log_limit::WarnLimiter;
use crate::processor::FrameProcessor;
use crate::read_queue::ReadQueue;
use crate::reassembly::{FrameAccumulator, InsertOutcome, ReassemblyRing};
use crate::stats::{StreamReport, StreamStats};

const FRAME_CHANNEL_DEPTH: usize = 16;
const COMMAND_CHANNEL_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub listen: SocketAddr,
    pub udp_size: usize,
    /// Block count assumed until the first metadata block arrives.
    pub nb_original: u8,
    pub ring_slots: usize,
    /// Rate assumed until the first metadata block arrives.
    pub sample_rate: u32,
}

#[derive(Debug)]
pub enum ReceiverCommand {
    GetReport(oneshot::Sender<StreamReport>),
    ResetStats,
    Stop,
}

pub struct ReceiverHandle {
    local_addr: SocketAddr,
    queue: Arc<ReadQueue>,
    stats: Arc<StreamStats>,
    sync: Arc<ClockSync>,
    meta_rx: watch::Receiver<Option<MetaDataFec>>,
    cmd_tx: mpsc::Sender<ReceiverCommand>,
    shutdown_tx: watch::Sender<bool>,
    socket_task: JoinHandle<()>,
    processor_task: JoinHandle<()>,
}

impl ReceiverHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn queue(&self) -> Arc<ReadQueue> {
        Arc::clone(&self.queue)
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }

    pub fn sync(&self) -> Arc<ClockSync> {
        Arc::clone(&self.sync)
    }

    /// Adopted stream metadata; changes whenever the sender's parameters do.
    pub fn meta_rx(&self) -> watch::Receiver<Option<MetaDataFec>> {
        self.meta_rx.clone()
    }

    pub async fn command(&self, cmd: ReceiverCommand) -> bool {
        self.cmd_tx.send(cmd).await.is_ok()
    }

    /// Snapshot served by the processor task.
    pub async fn report(&self) -> Option<StreamReport> {
        let (tx, rx) = oneshot::channel();
        if !self.command(ReceiverCommand::GetReport(tx)).await {
            return None;
        }
        rx.await.ok()
    }

    /// Close the socket, then wait for both tasks.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.socket_task.await {
            error!("receiver socket task failed: {}", e);
        }
        if let Err(e) = self.processor_task.await {
            error!("receiver processor task failed: {}", e);
        }
    }
}

/// Bind `settings.listen` and start the socket and processor tasks.
pub async fn start_receiver(settings: ReceiverSettings) -> io::Result<ReceiverHandle> {
    let socket = UdpSocket::bind(settings.listen).await?;
    let local_addr = socket.local_addr()?;
    info!(
        "receiving on {} ({} byte datagrams, {} slot reorder window)",
        local_addr, settings.udp_size, settings.ring_slots
    );

    let queue = Arc::new(ReadQueue::for_sample_rate(settings.sample_rate));
    let stats = Arc::new(StreamStats::new());
    let sync = Arc::new(ClockSync::new(settings.sample_rate));
    let (meta_tx, meta_rx) = watch::channel(None);
    let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_DEPTH);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let socket_task = tokio::spawn(run_socket(
        socket,
        settings.udp_size,
        ReassemblyRing::new(settings.ring_slots),
        Arc::clone(&stats),
        frame_tx,
        shutdown_rx.clone(),
    ));

    let processor = FrameProcessor::new(
        settings.nb_original as usize,
        Arc::clone(&queue),
        Arc::clone(&stats),
        Arc::clone(&sync),
        meta_tx,
    );
    let processor_task = tokio::spawn(run_processor(
        processor,
        Arc::clone(&queue),
        Arc::clone(&stats),
        frame_rx,
        cmd_rx,
        shutdown_tx.clone(),
        shutdown_rx,
    ));

    Ok(ReceiverHandle {
        local_addr,
        queue,
        stats,
        sync,
        meta_rx,
        cmd_tx,
        shutdown_tx,
        socket_task,
        processor_task,
    })
}

async fn run_socket(
    socket: UdpSocket,
    udp_size: usize,
    mut ring: ReassemblyRing,
    stats: Arc<StreamStats>,
    frame_tx: mpsc::Sender<FrameAccumulator>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // One byte of headroom so oversized datagrams are seen as such.
    let mut buf = vec![0u8; MAX_UDP_SIZE.max(udp_size) + 1];
    let mut size_errors = WarnLimiter::new("datagram discarded");
    let mut backlog = WarnLimiter::new("frame dropped, processor behind");

    loop {
        let (len, peer) = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    size_errors.warn(&format!("recv: {}", e));
                    continue;
                }
            },
        };

        let block = match SuperBlock::parse(&buf[..len], udp_size) {
            Ok(block) => block,
            Err(e) => {
                StreamStats::add(&stats.size_errors, 1);
                size_errors.warn(&format!("from {}: {}", peer, e));
                continue;
            }
        };
        let (frame_index, block_index) = (block.header.frame_index, block.header.block_index);
        trace!("frame {} block {} from {}", frame_index, block_index, peer);

        match ring.insert(block) {
            InsertOutcome::Flushed(frame) => {
                if !forward_frame(&frame_tx, frame, &stats, &mut backlog) {
                    break;
                }
            }
            InsertOutcome::Late => {
                StreamStats::add(&stats.late_blocks, 1);
                debug!("late block {} of frame {} dropped", block_index, frame_index);
            }
            InsertOutcome::Started | InsertOutcome::Merged | InsertOutcome::Duplicate => {}
        }
    }
    drop(socket);
    debug!("receiver socket closed");
}

/// Hand a flushed frame to the processor without waiting on it. A full
/// channel drops the frame; returns `false` once the processor is gone.
fn forward_frame(
    frame_tx: &mpsc::Sender<FrameAccumulator>,
    frame: FrameAccumulator,
    stats: &StreamStats,
    backlog: &mut WarnLimiter,
) -> bool {
    match frame_tx.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(frame)) => {
            StreamStats::add(&stats.processor_drops, 1);
            backlog.warn(&format!("frame {}", frame.frame_index()));
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

async fn run_processor(
    mut processor: FrameProcessor,
    queue: Arc<ReadQueue>,
    stats: Arc<StreamStats>,
    mut frame_rx: mpsc::Receiver<FrameAccumulator>,
    mut cmd_rx: mpsc::Receiver<ReceiverCommand>,
    shutdown_tx: watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = frame_rx.recv() => match frame {
                Some(frame) => {
                    let index = frame.frame_index();
                    let outcome = processor.process(frame);
                    trace!("frame {}: {:?}", index, outcome);
                }
                None => break,
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(ReceiverCommand::GetReport(respond_to)) => {
                    let _ = respond_to.send(stats.snapshot(&queue));
                }
                Some(ReceiverCommand::ResetStats) => {
                    info!("receiver statistics reset");
                    stats.reset();
                }
                Some(ReceiverCommand::Stop) => {
                    let _ = shutdown_tx.send(true);
                }
                None => break,
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    debug!("receiver processor stopped");
}
