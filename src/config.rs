//! Configuration loading and persistence.
//!
//! Reads `config.json` from the boxctl config directory, then applies
//! environment variable overrides on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::command::SessionConfig;

/// Configuration for the boxctl CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Engine control-channel socket.
    pub socket_path: PathBuf,
    /// Profile-exchange socket, used by both `profile fetch` and `profile serve`.
    pub profile_socket_path: PathBuf,
    /// Settings for each control-channel session.
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        let base = dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("boxctl");
        Self {
            socket_path: base.join("command.sock"),
            profile_socket_path: base.join("profile.sock"),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `BOXCTL_CONFIG_DIR` wins; otherwise the platform config dir is used
    /// (Linux: `~/.config/boxctl`).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = match std::env::var("BOXCTL_CONFIG_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::config_dir()
                .context("Could not determine config directory")?
                .join("boxctl"),
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file yields the defaults; an unreadable one is an error.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("BOXCTL_SOCKET") {
            self.socket_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("BOXCTL_PROFILE_SOCKET") {
            self.profile_socket_path = PathBuf::from(path);
        }

        if let Some(cap) = lookup("BOXCTL_LOG_CAP") {
            match cap.parse::<usize>() {
                Ok(cap) if cap > 0 => self.session.log_cap_lines = cap,
                _ => log::warn!("Ignoring invalid BOXCTL_LOG_CAP: {cap}"),
            }
        }

        if let Some(interval) = lookup("BOXCTL_STATUS_INTERVAL_MS") {
            match interval.parse::<u64>() {
                Ok(ms) => self.session.status_interval_nanos = ms.saturating_mul(1_000_000),
                Err(_) => log::warn!("Ignoring invalid BOXCTL_STATUS_INTERVAL_MS: {interval}"),
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?.join("config.json"))
    }

    /// Write the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}
