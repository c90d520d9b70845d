// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for trx-remote.
//!
//! Config is loaded from the `[trx-remote]` section of `trx-rs.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./trx-rs.toml`
//! 3. `~/.config/trx-rs/trx-rs.toml`
//! 4. `/etc/trx-rs/trx-rs.toml`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trx_app::ConfigFile;
use trx_fircore::{BandpassParams, Window};
use trx_iqlink::codec::{MAX_BLOCKS_PER_FRAME, MAX_ORIGINAL_BLOCKS, MAX_UDP_SIZE, MIN_UDP_SIZE};
use trx_iqlink::{
    FramerSettings, PullSettings, ReceiverSettings, SampleFormat, SenderSettings, HEADER_SIZE,
};

const MAX_RING_SLOTS: usize = 64;

/// Top-level trx-remote configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub general: GeneralConfig,
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Transmit side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Receiver address datagrams are sent to
    pub remote_addr: SocketAddr,
    /// Datagram size in bytes, header included
    pub udp_size: usize,
    /// Bytes per I or Q component (2 or 4)
    pub sample_bytes: u8,
    pub sample_bits: u8,
    /// Blocks per frame including the metadata block
    pub nb_original_blocks: u8,
    /// Reed-Solomon recovery blocks per frame
    pub nb_fec_blocks: u8,
    /// Fraction of the frame duration used to spread datagrams
    pub tx_delay_ratio: f32,
    pub center_frequency_khz: u32,
    pub sample_rate: u32,
    pub device_index: u8,
    pub channel_index: u8,
    pub source: SourceConfig,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            remote_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            udp_size: 512,
            sample_bytes: 2,
            sample_bits: 16,
            nb_original_blocks: 128,
            nb_fec_blocks: 8,
            tx_delay_ratio: 0.35,
            center_frequency_khz: 435_000,
            sample_rate: 48_000,
            device_index: 0,
            channel_index: 0,
            source: SourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Tone,
    File,
    Silence,
}

/// Sample source for the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Tone offset from the center frequency (Hz)
    pub tone_hz: f64,
    pub amplitude: f32,
    /// Interleaved little-endian f32 I/Q file, used when kind = "file"
    pub file: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Tone,
            tone_hz: 1_000.0,
            amplitude: 0.5,
            file: None,
        }
    }
}

/// Receive side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub listen: SocketAddr,
    pub udp_size: usize,
    /// Blocks per frame assumed until metadata arrives
    pub nb_original_blocks: u8,
    /// Sample rate assumed until metadata arrives
    pub sample_rate: u32,
    /// Reorder window in frames (power of two)
    pub ring_slots: usize,
    /// Pull loop period (ms)
    pub tick_ms: u64,
    pub auto_correction: bool,
    /// Correction bound as a fraction of the nominal chunk
    pub correction_limit: f64,
    /// Statistics log period (s), 0 disables
    pub report_interval_s: u64,
    /// Write filtered I/Q here as interleaved little-endian f32
    pub output: Option<PathBuf>,
    pub filter: FilterConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9090)),
            udp_size: 512,
            nb_original_blocks: 128,
            sample_rate: 48_000,
            ring_slots: 4,
            tick_ms: 50,
            auto_correction: true,
            correction_limit: 0.01,
            report_interval_s: 10,
            output: None,
            filter: FilterConfig::default(),
        }
    }
}

/// Receive-side bandpass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    /// FFT block size (power of two)
    pub size: usize,
    pub taps: usize,
    /// Passband edges relative to the center frequency (Hz)
    pub low_hz: f64,
    pub high_hz: f64,
    pub min_phase: bool,
    /// rectangular, hann or blackman-harris
    pub window: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 1024,
            taps: 2048,
            low_hz: -3_000.0,
            high_hz: 3_000.0,
            min_phase: false,
            window: "blackman-harris".to_string(),
        }
    }
}

impl FilterConfig {
    pub fn bandpass_params(&self, sample_rate: u32) -> Result<BandpassParams, String> {
        let window = Window::from_name(&self.window)
            .ok_or_else(|| format!("[receiver.filter].window '{}' is unknown", self.window))?;
        Ok(BandpassParams {
            low_hz: self.low_hz,
            high_hz: self.high_hz,
            sample_rate: sample_rate as f64,
            taps: self.taps,
            window,
            gain: 1.0,
        })
    }
}

impl SenderConfig {
    pub fn format(&self) -> Result<SampleFormat, String> {
        SampleFormat::new(self.sample_bytes, self.sample_bits).map_err(|e| e.to_string())
    }

    pub fn settings(&self) -> Result<SenderSettings, String> {
        Ok(SenderSettings {
            target: self.remote_addr,
            framer: FramerSettings {
                udp_size: self.udp_size,
                format: self.format()?,
                nb_original: self.nb_original_blocks,
                nb_fec: self.nb_fec_blocks,
                center_frequency_khz: self.center_frequency_khz,
                sample_rate: self.sample_rate,
                device_index: self.device_index,
                channel_index: self.channel_index,
            },
            tx_delay_ratio: self.tx_delay_ratio,
        })
    }
}

impl ReceiverConfig {
    pub fn settings(&self) -> ReceiverSettings {
        ReceiverSettings {
            listen: self.listen,
            udp_size: self.udp_size,
            nb_original: self.nb_original_blocks,
            ring_slots: self.ring_slots,
            sample_rate: self.sample_rate,
        }
    }

    pub fn pull_settings(&self) -> PullSettings {
        PullSettings {
            tick: Duration::from_millis(self.tick_ms),
            auto_correction: self.auto_correction,
            correction_limit: self.correction_limit,
        }
    }
}

impl ConfigFile for RemoteConfig {
    fn section_key() -> &'static str {
        "trx-remote"
    }
}

impl RemoteConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;
        self.validate_sender()?;
        self.validate_receiver()
    }

    fn validate_sender(&self) -> Result<(), String> {
        let s = &self.sender;
        validate_udp_size("[sender].udp_size", s.udp_size)?;
        let format = s.format().map_err(|e| format!("[sender]: {}", e))?;
        if (s.udp_size - HEADER_SIZE) % format.frame_bytes() != 0 {
            return Err(format!(
                "[sender].udp_size payload ({} bytes) is not a multiple of the {}-byte I/Q sample",
                s.udp_size - HEADER_SIZE,
                format.frame_bytes()
            ));
        }
        if !(2..=MAX_ORIGINAL_BLOCKS).contains(&(s.nb_original_blocks as usize)) {
            return Err(format!(
                "[sender].nb_original_blocks must be in range 2..={}",
                MAX_ORIGINAL_BLOCKS
            ));
        }
        if s.nb_original_blocks as usize + s.nb_fec_blocks as usize > MAX_BLOCKS_PER_FRAME {
            return Err(format!(
                "[sender].nb_original_blocks + nb_fec_blocks must be <= {}",
                MAX_BLOCKS_PER_FRAME
            ));
        }
        if !(0.0..=1.0).contains(&s.tx_delay_ratio) {
            return Err("[sender].tx_delay_ratio must be in range 0.0..=1.0".to_string());
        }
        if s.sample_rate == 0 {
            return Err("[sender].sample_rate must be > 0".to_string());
        }
        if s.source.kind == SourceKind::File && s.source.file.is_none() {
            return Err("[sender.source].file is required when kind = \"file\"".to_string());
        }
        Ok(())
    }

    fn validate_receiver(&self) -> Result<(), String> {
        let r = &self.receiver;
        validate_udp_size("[receiver].udp_size", r.udp_size)?;
        if !(2..=MAX_ORIGINAL_BLOCKS).contains(&(r.nb_original_blocks as usize)) {
            return Err(format!(
                "[receiver].nb_original_blocks must be in range 2..={}",
                MAX_ORIGINAL_BLOCKS
            ));
        }
        if r.sample_rate == 0 {
            return Err("[receiver].sample_rate must be > 0".to_string());
        }
        if !(2..=MAX_RING_SLOTS).contains(&r.ring_slots) || !r.ring_slots.is_power_of_two() {
            return Err(format!(
                "[receiver].ring_slots must be a power of two in range 2..={}",
                MAX_RING_SLOTS
            ));
        }
        if r.tick_ms == 0 {
            return Err("[receiver].tick_ms must be > 0".to_string());
        }
        if !(0.0..=0.5).contains(&r.correction_limit) {
            return Err("[receiver].correction_limit must be in range 0.0..=0.5".to_string());
        }

        let f = &r.filter;
        if !f.size.is_power_of_two() {
            return Err("[receiver.filter].size must be a power of two".to_string());
        }
        if f.taps < 1 {
            return Err("[receiver.filter].taps must be >= 1".to_string());
        }
        if f.low_hz >= f.high_hz {
            return Err("[receiver.filter].low_hz must be below high_hz".to_string());
        }
        f.bandpass_params(r.sample_rate)?;
        Ok(())
    }

    /// Example configuration under the `[trx-remote]` header.
    pub fn example_toml() -> String {
        #[derive(Serialize)]
        struct Wrapper {
            #[serde(rename = "trx-remote")]
            inner: RemoteConfig,
        }
        let example = RemoteConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            sender: SenderConfig::default(),
            receiver: ReceiverConfig {
                output: Some(PathBuf::from("rx.iq")),
                ..ReceiverConfig::default()
            },
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_udp_size(key: &str, udp_size: usize) -> Result<(), String> {
    if !(MIN_UDP_SIZE..=MAX_UDP_SIZE).contains(&udp_size) {
        return Err(format!(
            "{} must be in range {}..={}",
            key, MIN_UDP_SIZE, MAX_UDP_SIZE
        ));
    }
    Ok(())
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    match level {
        None | Some("trace" | "debug" | "info" | "warn" | "error") => Ok(()),
        Some(level) => Err(format!(
            "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
            level
        )),
    }
}
