// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Datagram pacing for the transmit side.
//!
//! Each frame's datagrams are spread across a fraction of the frame duration
//! instead of being written back to back. Send times are absolute deadlines
//! measured from the first datagram so sleep overshoot does not accumulate.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::framer::TxFrame;
use crate::log_limit::WarnLimiter;
use crate::stats::{SenderStats, StreamStats};

/// How often an idle pacer re-checks the stop flag.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Spacing between consecutive datagrams of one frame.
pub fn datagram_delay(
    tx_delay_ratio: f32,
    nb_original: u8,
    nb_fec: u8,
    samples_per_block: usize,
    sample_rate: u32,
) -> Duration {
    let blocks = nb_original as u32 + nb_fec as u32;
    if blocks == 0 || sample_rate == 0 {
        return Duration::ZERO;
    }
    let frame_s = (nb_original as f64 - 1.0).max(0.0) * samples_per_block as f64 / sample_rate as f64;
    let ratio = tx_delay_ratio.clamp(0.0, 1.0) as f64;
    Duration::from_secs_f64(ratio * frame_s / blocks as f64)
}

/// A frame handed from the framer thread to the pacer thread.
#[derive(Debug)]
pub struct PacedFrame {
    pub frame: TxFrame,
    pub delay: Duration,
}

pub struct TxPacer {
    socket: UdpSocket,
    target: SocketAddr,
    stop: Arc<AtomicBool>,
    stats: Arc<SenderStats>,
    errors: WarnLimiter,
}

impl TxPacer {
    pub fn new(
        socket: UdpSocket,
        target: SocketAddr,
        stop: Arc<AtomicBool>,
        stats: Arc<SenderStats>,
    ) -> Self {
        Self {
            socket,
            target,
            stop,
            stats,
            errors: WarnLimiter::new("UDP send"),
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send every datagram of `frame`, `delay` apart. Stops early, dropping
    /// the rest of the frame, once the stop flag is raised. Returns the
    /// number of datagrams written.
    pub fn send_frame(&mut self, frame: &TxFrame, delay: Duration) -> usize {
        let start = Instant::now();
        let mut sent = 0;
        for (i, datagram) in frame.datagrams.iter().enumerate() {
            if self.stop.load(Ordering::Relaxed) {
                debug!(
                    "pacer stopped mid-frame {} after {} datagrams",
                    frame.frame_index, sent
                );
                break;
            }
            let deadline = start + delay * i as u32;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            match self.socket.send_to(datagram, self.target) {
                Ok(_) => {
                    sent += 1;
                    StreamStats::add(&self.stats.datagrams_sent, 1);
                }
                Err(e) => {
                    StreamStats::add(&self.stats.send_errors, 1);
                    self.errors.warn(&e.to_string());
                }
            }
        }
        sent
    }

    /// Drain `rx` until the channel closes or the stop flag is raised.
    pub fn run(mut self, rx: Receiver<PacedFrame>) {
        info!("pacer sending to {}", self.target);
        while !self.stop.load(Ordering::Relaxed) {
            match rx.recv_timeout(IDLE_POLL) {
                Ok(paced) => {
                    self.send_frame(&paced.frame, paced.delay);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("pacer for {} finished", self.target);
    }
}
