// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod sink;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use trx_app::{init_logging, ConfigFile};
use trx_fircore::{BandpassControl, BandpassFilter};
use trx_iqlink::{
    spawn_sender, start_receiver, FileIqSource, IqSource, MetaDataFec, MockIqSource, NullSink,
    PullPacer, SampleSink, ToneIqSource,
};

use config::{ReceiverConfig, RemoteConfig, SenderConfig, SourceKind};
use sink::{FilterSink, IqFileSink};

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - FEC-protected I/Q streaming over UDP");
const SENDER_REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream I/Q samples to a receiver
    Send {
        /// Receiver address
        #[arg(long = "to", value_name = "ADDR")]
        to: Option<SocketAddr>,
        /// Recovery blocks per frame
        #[arg(long = "fec")]
        fec: Option<u8>,
        /// Sample rate (S/s)
        #[arg(long = "rate", value_name = "HZ")]
        rate: Option<u32>,
        /// Send a tone at this offset (Hz)
        #[arg(long = "tone", value_name = "HZ", conflicts_with = "file")]
        tone: Option<f64>,
        /// Replay an interleaved f32 I/Q file
        #[arg(long = "file", value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// Receive, repair and filter a stream
    Recv {
        /// Local address to listen on
        #[arg(long = "listen", value_name = "ADDR")]
        listen: Option<SocketAddr>,
        /// Write filtered I/Q to this file
        #[arg(long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Bypass the bandpass filter
        #[arg(long = "no-filter")]
        no_filter: bool,
    },
}

/// Fold command-line overrides into the loaded configuration.
fn apply_cli(cfg: &mut RemoteConfig, command: &Command) {
    match command {
        Command::Send {
            to,
            fec,
            rate,
            tone,
            file,
        } => {
            let sender = &mut cfg.sender;
            if let Some(to) = to {
                sender.remote_addr = *to;
            }
            if let Some(fec) = fec {
                sender.nb_fec_blocks = *fec;
            }
            if let Some(rate) = rate {
                sender.sample_rate = *rate;
            }
            if let Some(tone) = tone {
                sender.source.kind = SourceKind::Tone;
                sender.source.tone_hz = *tone;
            }
            if let Some(file) = file {
                sender.source.kind = SourceKind::File;
                sender.source.file = Some(file.clone());
            }
        }
        Command::Recv {
            listen,
            output,
            no_filter,
        } => {
            let receiver = &mut cfg.receiver;
            if let Some(listen) = listen {
                receiver.listen = *listen;
            }
            if let Some(output) = output {
                receiver.output = Some(output.clone());
            }
            if *no_filter {
                receiver.filter.enabled = false;
            }
        }
    }
}

fn open_source(cfg: &SenderConfig) -> DynResult<Box<dyn IqSource>> {
    let source: Box<dyn IqSource> = match cfg.source.kind {
        SourceKind::Tone => Box::new(ToneIqSource::new(
            cfg.source.tone_hz,
            cfg.source.amplitude,
            cfg.sample_rate,
        )),
        SourceKind::File => {
            let path = cfg
                .source
                .file
                .as_deref()
                .ok_or("[sender.source].file is not set")?;
            Box::new(FileIqSource::open(path)?)
        }
        SourceKind::Silence => Box::new(MockIqSource),
    };
    Ok(source)
}

async fn run_send(cfg: &SenderConfig) -> DynResult<()> {
    let settings = cfg.settings()?;
    let source = open_source(cfg)?;
    let handle = spawn_sender(settings, source)?;

    let mut ticker = tokio::time::interval(SENDER_REPORT_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("Ctrl+C received, shutting down");
                break;
            }
            _ = ticker.tick() => {
                info!("sender: {}", serde_json::to_string(&handle.stats())?);
            }
        }
    }

    tokio::task::spawn_blocking(move || handle.stop()).await?;
    Ok(())
}

/// Redesign the filter whenever the stream sample rate changes.
async fn follow_sample_rate(
    mut meta_rx: watch::Receiver<Option<MetaDataFec>>,
    control: BandpassControl,
    mut sample_rate: u32,
) {
    while meta_rx.changed().await.is_ok() {
        let Some(meta) = *meta_rx.borrow_and_update() else {
            continue;
        };
        if meta.sample_rate == sample_rate {
            continue;
        }
        sample_rate = meta.sample_rate;
        if let Err(e) = control.set_sample_rate(sample_rate as f64) {
            warn!("filter redesign for {} S/s failed: {}", sample_rate, e);
        }
    }
}

/// Next report tick; never fires when reporting is disabled.
async fn report_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_recv(cfg: &ReceiverConfig) -> DynResult<()> {
    let handle = start_receiver(cfg.settings()).await?;

    let mut sink: Box<dyn SampleSink> = match cfg.output.as_deref() {
        Some(path) => {
            info!("writing I/Q to {}", path.display());
            Box::new(IqFileSink::create(path)?)
        }
        None => Box::new(NullSink),
    };
    let mut rate_task = None;
    if cfg.filter.enabled {
        let params = cfg.filter.bandpass_params(cfg.sample_rate)?;
        info!(
            "bandpass {:.0}..{:.0} Hz, {} taps, block {}{}",
            params.low_hz,
            params.high_hz,
            params.taps,
            cfg.filter.size,
            if cfg.filter.min_phase { ", minimum phase" } else { "" }
        );
        let filter = BandpassFilter::new(params, cfg.filter.size, cfg.filter.min_phase)?;
        let filtered = FilterSink::new(filter, sink);
        rate_task = Some(tokio::spawn(follow_sample_rate(
            handle.meta_rx(),
            filtered.control(),
            cfg.sample_rate,
        )));
        sink = Box::new(filtered);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let pull = PullPacer::new(handle.queue(), handle.stats(), handle.sync(), cfg.pull_settings());
    let pull_thread = pull.spawn(sink, Arc::clone(&stop));

    let mut ticker = (cfg.report_interval_s > 0)
        .then(|| tokio::time::interval(Duration::from_secs(cfg.report_interval_s)));
    if let Some(ticker) = ticker.as_mut() {
        ticker.tick().await;
    }
    loop {
        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("Ctrl+C received, shutting down");
                break;
            }
            _ = report_tick(&mut ticker) => {
                match handle.report().await {
                    Some(report) => info!("receiver: {}", serde_json::to_string(&report)?),
                    None => {
                        error!("receiver stopped unexpectedly");
                        break;
                    }
                }
            }
        }
    }

    handle.stop().await;
    stop.store(true, Ordering::Relaxed);
    if let Some(task) = rate_task {
        task.abort();
    }
    tokio::task::spawn_blocking(move || pull_thread.join())
        .await?
        .map_err(|_| "pull thread panicked")?;
    Ok(())
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", RemoteConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = RemoteConfig::load(cli.config.as_deref())?;
    let Some(command) = cli.command else {
        return Err("no command given; use `send` or `recv` (see --help)".into());
    };
    apply_cli(&mut cfg, &command);
    cfg.validate()
        .map_err(|e| format!("Invalid trx-remote configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());
    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    match command {
        Command::Send { .. } => run_send(&cfg.sender).await,
        Command::Recv { .. } => run_recv(&cfg.receiver).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_sender_settings() {
        let cli = Cli::parse_from([
            "trx-remote",
            "send",
            "--to",
            "192.0.2.1:7000",
            "--fec",
            "16",
            "--file",
            "capture.iq",
        ]);
        let mut cfg = RemoteConfig::default();
        apply_cli(&mut cfg, cli.command.as_ref().unwrap());
        assert_eq!(cfg.sender.remote_addr, "192.0.2.1:7000".parse().unwrap());
        assert_eq!(cfg.sender.nb_fec_blocks, 16);
        assert_eq!(cfg.sender.source.kind, SourceKind::File);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn cli_overrides_receiver_settings() {
        let cli = Cli::parse_from(["trx-remote", "-C", "x.toml", "recv", "--no-filter"]);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        let mut cfg = RemoteConfig::default();
        apply_cli(&mut cfg, cli.command.as_ref().unwrap());
        assert!(!cfg.receiver.filter.enabled);
    }

    #[test]
    fn tone_and_file_conflict() {
        assert!(Cli::try_parse_from([
            "trx-remote",
            "send",
            "--tone",
            "500",
            "--file",
            "a.iq"
        ])
        .is_err());
    }
}
