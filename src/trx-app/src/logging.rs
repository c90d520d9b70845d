// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tracing::Level;
use tracing_subscriber::EnvFilter;

fn default_level(log_level: Option<&str>) -> Level {
    log_level
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}

/// Initialize logging with optional level from config.
/// `RUST_LOG` takes precedence; falls back to INFO if the level is None or
/// invalid. Later calls are ignored.
pub fn init_logging(log_level: Option<&str>) {
    let level = default_level(log_level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_falls_back_to_info() {
        assert_eq!(default_level(None), Level::INFO);
        assert_eq!(default_level(Some("loud")), Level::INFO);
        assert_eq!(default_level(Some("debug")), Level::DEBUG);
        assert_eq!(default_level(Some("WARN")), Level::WARN);
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_logging(Some("info"));
        init_logging(Some("trace"));
    }
}
