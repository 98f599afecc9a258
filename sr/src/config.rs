//! Application directory resolution and `settings.toml`.
//!
//! Directory resolution follows the reference implementation's
//! `sr/config.py::get_sr_dir` precisely: environment override, then a line in
//! a user config file, then a fixed default. `settings.toml` itself is a flat
//! key=value document read/written with `toml_edit`, following a
//! read-existing-or-write-defaults pattern.

use crate::Error;
use chrono::{DateTime, Utc};
use etcetera::{AppStrategy, AppStrategyArgs, choose_app_strategy};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, read_to_string, write};
use std::path::PathBuf;
use toml_edit::DocumentMut;

const ENV_OVERRIDE: &str = "SR_DIR";

/// Resolves the application directory: `$SR_DIR`, then `DIR=` in
/// `~/.config/sr/config`, then `~/.local/share/sr`.
#[must_use]
pub fn get_sr_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_OVERRIDE) {
        return PathBuf::from(dir);
    }
    if let Some(strategy) = xdg_strategy() {
        let config_path = strategy.config_dir().join("config");
        if let Ok(contents) = read_to_string(&config_path) {
            for line in contents.lines() {
                let line = line.trim();
                if let Some(dir) = line.strip_prefix("DIR=") {
                    return PathBuf::from(dir.trim());
                }
            }
        }
    }
    default_sr_dir()
}

fn default_sr_dir() -> PathBuf {
    etcetera::home_dir()
        .map(|home| home.join(".local").join("share").join("sr"))
        .unwrap_or_else(|_| PathBuf::from(".sr"))
}

fn xdg_strategy() -> Option<etcetera::app_strategy::Xdg> {
    choose_app_strategy(AppStrategyArgs {
        top_level_domain: "org".to_string(),
        author: "sr".to_string(),
        app_name: "sr".to_string(),
    })
    .ok()
}

/// `settings.toml`'s recognized keys. Unknown keys are preserved on
/// round-trip: `write_settings` merges into the parsed document rather than
/// re-serializing this struct wholesale.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub scheduler: String,
    pub review_port: u16,
    pub edit_command: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scheduler: "sm2".to_string(),
            review_port: 8791,
            edit_command: None,
        }
    }
}

fn settings_path(sr_dir: &std::path::Path) -> PathBuf {
    sr_dir.join("settings.toml")
}

/// Reads `settings.toml`, writing out the default file on first run — the
/// reference crate's `read_external_config` does the same so that adding a
/// new recognized key never breaks an existing deployment's config file.
pub fn read_settings(sr_dir: &std::path::Path) -> Result<Settings, Error> {
    let path = settings_path(sr_dir);
    if !path.exists() {
        let settings = Settings::default();
        write_settings(sr_dir, &settings)?;
        return Ok(settings);
    }
    let contents = read_to_string(&path).map_err(|e| Error::Io {
        description: format!("Failed to read {}.", path.display()),
        source: e,
    })?;
    let doc = contents
        .parse::<DocumentMut>()
        .map_err(|e| Error::Library(crate::LibraryError::InvalidConfig(e.to_string())))?;
    toml_edit::de::from_document(doc)
        .map_err(|e| Error::Library(crate::LibraryError::InvalidConfig(e.to_string())))
}

/// Merges the recognized keys into the existing document rather than
/// serializing `Settings` wholesale, so a key this struct doesn't know about
/// (set by a newer or external tool) survives a write from this process.
pub fn write_settings(sr_dir: &std::path::Path, settings: &Settings) -> Result<(), Error> {
    create_dir_all(sr_dir).map_err(|e| Error::Io {
        description: format!("Failed to create {}.", sr_dir.display()),
        source: e,
    })?;
    let path = settings_path(sr_dir);
    let mut doc = match read_to_string(&path) {
        Ok(contents) => contents
            .parse::<DocumentMut>()
            .map_err(|e| Error::Library(crate::LibraryError::InvalidConfig(e.to_string())))?,
        Err(_) => DocumentMut::new(),
    };
    doc["scheduler"] = toml_edit::value(settings.scheduler.clone());
    doc["review_port"] = toml_edit::value(i64::from(settings.review_port));
    match &settings.edit_command {
        Some(cmd) => doc["edit_command"] = toml_edit::value(cmd.clone()),
        None => {
            doc.remove("edit_command");
        }
    }
    write(&path, doc.to_string()).map_err(|e| Error::Io {
        description: format!("Failed to write {}.", path.display()),
        source: e,
    })
}

/// Injected time source. The default is real UTC
/// time; tests substitute a fixed clock so scheduling and due-gating are
/// deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "testing"))]
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(any(test, feature = "testing"))]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_file_writes_and_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_settings(dir.path()).unwrap();
        assert_eq!(settings.scheduler, "sm2");
        assert_eq!(settings.review_port, 8791);
        assert!(settings_path(dir.path()).exists());
    }

    #[test]
    fn settings_round_trip_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            scheduler: "custom".to_string(),
            review_port: 9000,
            edit_command: Some("vim +{line} {file}".to_string()),
        };
        write_settings(dir.path(), &settings).unwrap();
        let read_back = read_settings(dir.path()).unwrap();
        assert_eq!(read_back.scheduler, "custom");
        assert_eq!(read_back.review_port, 9000);
        assert_eq!(read_back.edit_command.as_deref(), Some("vim +{line} {file}"));
    }

    #[test]
    fn write_settings_preserves_keys_it_does_not_recognize() {
        let dir = tempfile::tempdir().unwrap();
        let path = settings_path(dir.path());
        create_dir_all(dir.path()).unwrap();
        write(&path, "scheduler = \"sm2\"\nreview_port = 8791\nexternal_tool_key = \"keep-me\"\n")
            .unwrap();

        write_settings(dir.path(), &Settings::default()).unwrap();

        let contents = read_to_string(&path).unwrap();
        assert!(contents.contains("external_tool_key"));
    }

    #[test]
    fn env_override_takes_precedence() {
        // SAFETY: test-only env mutation, single-threaded within this test.
        unsafe { std::env::set_var(ENV_OVERRIDE, "/tmp/sr-test-dir") };
        assert_eq!(get_sr_dir(), PathBuf::from("/tmp/sr-test-dir"));
        unsafe { std::env::remove_var(ENV_OVERRIDE) };
    }
}
