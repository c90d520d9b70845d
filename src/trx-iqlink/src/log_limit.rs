// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Rate-limited warnings for the packet path.

use std::time::{Duration, Instant};

use tracing::warn;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Emits a warning at most once per interval per distinct message and
/// reports how many repeats were swallowed in between.
pub struct WarnLimiter {
    label: &'static str,
    interval: Duration,
    last_message: Option<String>,
    last_logged_at: Option<Instant>,
    suppressed: u64,
}

impl WarnLimiter {
    pub fn new(label: &'static str) -> Self {
        Self::with_interval(label, DEFAULT_INTERVAL)
    }

    pub fn with_interval(label: &'static str, interval: Duration) -> Self {
        Self {
            label,
            interval,
            last_message: None,
            last_logged_at: None,
            suppressed: 0,
        }
    }

    /// Returns whether the message was emitted.
    pub fn warn(&mut self, message: &str) -> bool {
        let now = Instant::now();
        let due = match (&self.last_message, self.last_logged_at) {
            (Some(prev), Some(at)) => prev != message || now.duration_since(at) >= self.interval,
            _ => true,
        };
        if !due {
            self.suppressed += 1;
            return false;
        }
        if self.suppressed > 0 {
            warn!(
                "{} repeated {} times: {}",
                self.label,
                self.suppressed,
                self.last_message.as_deref().unwrap_or("<unknown>")
            );
        }
        warn!("{}: {}", self.label, message);
        self.last_message = Some(message.to_string());
        self.last_logged_at = Some(now);
        self.suppressed = 0;
        true
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_are_suppressed() {
        let mut limiter = WarnLimiter::with_interval("test", Duration::from_secs(60));
        assert!(limiter.warn("bad datagram"));
        assert!(!limiter.warn("bad datagram"));
        assert!(!limiter.warn("bad datagram"));
        assert_eq!(limiter.suppressed(), 2);

        assert!(limiter.warn("crc mismatch"));
        assert_eq!(limiter.suppressed(), 0);
    }

    #[test]
    fn interval_elapses() {
        let mut limiter = WarnLimiter::with_interval("test", Duration::ZERO);
        assert!(limiter.warn("x"));
        assert!(limiter.warn("x"));
    }
}
