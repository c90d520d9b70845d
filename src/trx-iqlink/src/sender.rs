// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Transmit pipeline: IQ source -> framer -> pacer -> UDP.
//!
//! Two OS threads per stream. The framer thread pulls samples at the frame
//! clock and builds protected frames; the pacer thread spreads each frame's
//! datagrams over the wire. Control arrives as [`SenderCommand`]s.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use num_complex::Complex;
use tracing::{debug, error, info};

use crate::framer::{FramerSettings, TxFramer};
use crate::log_limit::WarnLimiter;
use crate::pacer::{datagram_delay, PacedFrame, TxPacer};
use crate::source::IqSource;
use crate::stats::{SenderReport, SenderStats, StreamStats};

/// Frames allowed in flight between framer and pacer.
const FRAME_CHANNEL_DEPTH: usize = 4;
/// A framer further behind its clock than this resynchronises instead of
/// bursting to catch up.
const MAX_LAG: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SenderCommand {
    SetFecBlocks(u8),
    SetTxDelayRatio(f32),
    SetCenterFrequency(u32),
    SetSampleRate(u32),
    Stop,
}

#[derive(Debug, Clone)]
pub struct SenderSettings {
    pub target: SocketAddr,
    pub framer: FramerSettings,
    pub tx_delay_ratio: f32,
}

pub struct SenderHandle {
    cmd_tx: mpsc::Sender<SenderCommand>,
    stop: Arc<AtomicBool>,
    stats: Arc<SenderStats>,
    local_addr: SocketAddr,
    threads: Vec<JoinHandle<()>>,
}

impl SenderHandle {
    /// Queue a command for the framer thread. Returns `false` once it has
    /// exited.
    pub fn command(&self, cmd: SenderCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn stats(&self) -> SenderReport {
        self.stats.snapshot()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop both threads and wait for them. Partially sent frames are dropped.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.cmd_tx.send(SenderCommand::Stop);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("sender thread panicked");
            }
        }
    }
}

impl Drop for SenderHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind a socket and start the framer and pacer threads.
pub fn spawn_sender(
    settings: SenderSettings,
    source: Box<dyn IqSource>,
) -> io::Result<SenderHandle> {
    let framer = TxFramer::new(settings.framer.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let bind: SocketAddr = if settings.target.is_ipv6() {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind)?;
    let local_addr = socket.local_addr()?;

    let stop = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(SenderStats::default());
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (frame_tx, frame_rx) = mpsc::sync_channel(FRAME_CHANNEL_DEPTH);

    info!(
        "sending to {} from {} ({} + {} blocks of {} bytes)",
        settings.target,
        local_addr,
        settings.framer.nb_original,
        settings.framer.nb_fec,
        settings.framer.udp_size
    );

    let pacer = TxPacer::new(socket, settings.target, Arc::clone(&stop), Arc::clone(&stats));
    let pacer_thread = std::thread::Builder::new()
        .name("iq-tx-pacer".to_string())
        .spawn(move || pacer.run(frame_rx))
        .expect("failed to spawn iq-tx-pacer thread");

    let mut task = FramerTask {
        framer,
        source,
        tx_delay_ratio: settings.tx_delay_ratio,
        stop: Arc::clone(&stop),
        stats: Arc::clone(&stats),
        frame_tx,
    };
    let framer_thread = std::thread::Builder::new()
        .name("iq-tx-framer".to_string())
        .spawn(move || task.run(cmd_rx))
        .expect("failed to spawn iq-tx-framer thread");

    Ok(SenderHandle {
        cmd_tx,
        stop,
        stats,
        local_addr,
        threads: vec![framer_thread, pacer_thread],
    })
}

struct FramerTask {
    framer: TxFramer,
    source: Box<dyn IqSource>,
    tx_delay_ratio: f32,
    stop: Arc<AtomicBool>,
    stats: Arc<SenderStats>,
    frame_tx: SyncSender<PacedFrame>,
}

impl FramerTask {
    fn run(&mut self, cmd_rx: Receiver<SenderCommand>) {
        let mut source_errors = WarnLimiter::new("IQ source read");
        let mut buf = vec![Complex::new(0.0_f32, 0.0_f32); self.framer.samples_per_frame()];
        let mut next = Instant::now();

        while !self.stop.load(Ordering::Relaxed) {
            loop {
                match cmd_rx.try_recv() {
                    Ok(SenderCommand::Stop) | Err(TryRecvError::Disconnected) => {
                        self.stop.store(true, Ordering::Relaxed);
                        break;
                    }
                    Ok(cmd) => {
                        if self.apply(cmd) {
                            buf.resize(self.framer.samples_per_frame(), Complex::new(0.0, 0.0));
                            next = Instant::now();
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }
            if self.stop.load(Ordering::Relaxed) {
                break;
            }

            let n = match self.source.read_into(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    source_errors.warn(&e);
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
            };
            if n == 0 {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            if !self.emit(&buf[..n]) {
                break;
            }

            next += self.framer.frame_duration().mul_f64(n as f64 / buf.len().max(1) as f64);
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else if now - next > MAX_LAG {
                debug!("framer {:?} behind its clock, resynchronising", now - next);
                next = now;
            }
        }
        debug!("framer stopped at frame {}", self.framer.next_frame_index());
    }

    /// Returns `true` when the frame geometry changed.
    fn apply(&mut self, cmd: SenderCommand) -> bool {
        match cmd {
            SenderCommand::SetFecBlocks(nb_fec) => {
                info!("FEC blocks per frame: {}", nb_fec);
                self.framer.set_fec_blocks(nb_fec);
                false
            }
            SenderCommand::SetTxDelayRatio(ratio) => {
                self.tx_delay_ratio = ratio.clamp(0.0, 1.0);
                info!("TX delay ratio: {:.2}", self.tx_delay_ratio);
                false
            }
            SenderCommand::SetCenterFrequency(khz) => {
                info!("center frequency: {} kHz", khz);
                self.framer.set_center_frequency(khz);
                false
            }
            SenderCommand::SetSampleRate(rate) => {
                info!("sample rate: {} S/s", rate);
                self.framer.set_sample_rate(rate);
                self.source.set_sample_rate(rate);
                true
            }
            SenderCommand::Stop => false,
        }
    }

    /// Returns `false` once the pacer is gone.
    fn emit(&mut self, samples: &[Complex<f32>]) -> bool {
        let frames = match self.framer.push(samples) {
            Ok(frames) => frames,
            Err(e) => {
                error!("framer error: {}", e);
                return true;
            }
        };
        for frame in frames {
            StreamStats::add(&self.stats.frames_built, 1);
            if frame.fec_fallback {
                StreamStats::add(&self.stats.fec_fallbacks, 1);
            }
            let settings = self.framer.settings();
            let delay = datagram_delay(
                self.tx_delay_ratio,
                settings.nb_original,
                frame.nb_fec,
                self.framer.samples_per_block(),
                settings.sample_rate,
            );
            if self.frame_tx.send(PacedFrame { frame, delay }).is_err() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SuperBlock;
    use crate::format::SampleFormat;
    use crate::source::ToneIqSource;

    fn settings(target: SocketAddr) -> SenderSettings {
        SenderSettings {
            target,
            framer: FramerSettings {
                udp_size: 64,
                format: SampleFormat::default(),
                nb_original: 4,
                nb_fec: 1,
                center_frequency_khz: 435_000,
                sample_rate: 48_000,
                device_index: 0,
                channel_index: 0,
            },
            tx_delay_ratio: 0.0,
        }
    }

    #[test]
    fn streams_frames_and_stops() {
        let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
        rx.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let handle = spawn_sender(
            settings(rx.local_addr().unwrap()),
            Box::new(ToneIqSource::new(1_000.0, 0.5, 48_000)),
        )
        .unwrap();

        let mut buf = [0u8; 128];
        let mut first = None;
        let mut indices = Vec::new();
        while indices.len() < 5 {
            let (n, _) = rx.recv_from(&mut buf).unwrap();
            let block = SuperBlock::parse(&buf[..n], 64).unwrap();
            let frame = *first.get_or_insert(block.header.frame_index);
            if block.header.frame_index == frame {
                indices.push(block.header.block_index);
            }
        }
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);

        assert!(handle.command(SenderCommand::SetFecBlocks(2)));
        let stats = handle.stats();
        assert!(stats.frames_built >= 1);
        assert_eq!(stats.fec_fallbacks, 0);
        handle.stop();
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let mut s = settings("127.0.0.1:9".parse().unwrap());
        s.framer.nb_original = 1;
        assert!(spawn_sender(s, Box::new(crate::source::MockIqSource)).is_err());
    }
}
