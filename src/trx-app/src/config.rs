// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Section-based loading of the shared `trx-rs.toml`.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "trx-rs.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, String),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, String),

    #[error("config file {0} has no [{1}] section")]
    MissingSection(PathBuf, &'static str),
}

/// Default search order: current directory, XDG config dir, /etc.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("trx-rs").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/trx-rs").join(CONFIG_FILE_NAME));
    paths
}

/// Deserialize the `[key]` table of `content`.
///
/// `Ok(None)` when the section is absent. Fields missing from the section
/// take their serde defaults.
pub fn load_section_from_str<T: DeserializeOwned>(
    content: &str,
    key: &str,
) -> Result<Option<T>, String> {
    let mut table: toml::Table = toml::from_str(content).map_err(|e| e.to_string())?;
    let Some(section) = table.remove(key) else {
        return Ok(None);
    };
    section.try_into::<T>().map(Some).map_err(|e| e.to_string())
}

fn load_section_from_file<T: DeserializeOwned>(
    path: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Read(path.to_path_buf(), e.to_string()))?;
    load_section_from_str(&content, key).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}

/// A struct loaded from one `[section]` of `trx-rs.toml`.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Section key, e.g. `"trx-remote"`.
    fn section_key() -> &'static str;

    /// Load the section from `path`. A missing section is an error here.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        load_section_from_file::<Self>(path, Self::section_key())?
            .ok_or_else(|| ConfigError::MissingSection(path.to_path_buf(), Self::section_key()))
    }

    /// First file on the search path that has the section, or defaults.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in config_search_paths() {
            if path.exists() {
                if let Some(cfg) = load_section_from_file::<Self>(&path, Self::section_key())? {
                    return Ok((cfg, Some(path)));
                }
            }
        }
        Ok((Self::default(), None))
    }

    /// `explicit` (from `--config`) wins over the search path.
    fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        match explicit {
            Some(path) => Ok((Self::load_from_file(path)?, Some(path.to_path_buf()))),
            None => Self::load_from_default_paths(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        port: u16,
        name: String,
    }

    impl ConfigFile for Sample {
        fn section_key() -> &'static str {
            "sample"
        }
    }

    #[test]
    fn section_defaults_fill_missing_fields() {
        let cfg: Option<Sample> =
            load_section_from_str("[sample]\nport = 9090\n\n[other]\nx = 1\n", "sample").unwrap();
        assert_eq!(
            cfg,
            Some(Sample {
                port: 9090,
                name: String::new()
            })
        );
    }

    #[test]
    fn absent_section_is_none() {
        let cfg: Option<Sample> = load_section_from_str("[other]\nx = 1\n", "sample").unwrap();
        assert!(cfg.is_none());
    }

    #[test]
    fn type_errors_are_reported() {
        let err = load_section_from_str::<Sample>("[sample]\nport = \"x\"\n", "sample");
        assert!(err.is_err());
    }

    #[test]
    fn explicit_path_must_hold_the_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sample]\nname = \"rx\"").unwrap();
        let (cfg, path) = Sample::load(Some(file.path())).unwrap();
        assert_eq!(cfg.name, "rx");
        assert_eq!(path.as_deref(), Some(file.path()));

        let mut other = tempfile::NamedTempFile::new().unwrap();
        writeln!(other, "[elsewhere]\nname = \"rx\"").unwrap();
        assert!(matches!(
            Sample::load(Some(other.path())),
            Err(ConfigError::MissingSection(_, "sample"))
        ));
    }

    #[test]
    fn unreadable_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Sample::load_from_file(&missing),
            Err(ConfigError::Read(..))
        ));
    }
}
