//! Configuration management for pshell.
//!
//! This module provides TOML configuration file loading from
//! `~/.pshell/config.toml` and the [`SessionConfig`] knobs used to open a
//! shell session.
//!
//! # Configuration File
//!
//! ```toml
//! # Optional cassette for record/replay of command output
//! cassette = "~/.pshell/cassette.toml"
//!
//! [session]
//! shell = "/bin/bash"
//! args = ["--norc", "--noediting"]
//! prompt = "zamm$ "
//! refresh_interval_ms = 100
//! read_timeout_ms = 30000
//! output_size = 1000
//!
//! [session.env]
//! TERM = "dumb"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell session settings
    pub session: SessionConfig,
    /// Record/replay cassette path
    pub cassette: Option<PathBuf>,
}

/// Settings for spawning and driving one shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell program
    pub shell: String,
    /// Shell arguments
    pub args: Vec<String>,
    /// Prompt forced through `PS1`, used as the completion sentinel
    pub prompt: String,
    /// Delay before the first read of the startup banner
    pub init_delay_ms: u64,
    /// Upper bound for the initial prompt to appear
    pub init_timeout_ms: u64,
    /// Delay between polls of the shell output
    pub refresh_interval_ms: u64,
    /// Upper bound for one command to finish
    pub read_timeout_ms: u64,
    /// How long `close` waits for the shell to exit on its own
    pub close_grace_ms: u64,
    /// Maximum bytes read at once
    pub output_size: usize,
    /// Pty width
    pub cols: u16,
    /// Pty height
    pub rows: u16,
    /// Extra environment variables for the shell
    pub env: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            // No readline: the pty line discipline does the echo, and no
            // bracketed-paste or wrap sequences get mixed into it
            args: vec!["--norc".to_string(), "--noediting".to_string()],
            prompt: "zamm$ ".to_string(),
            init_delay_ms: 100,
            init_timeout_ms: 5_000,
            refresh_interval_ms: 100,
            read_timeout_ms: 30_000,
            close_grace_ms: 1_000,
            output_size: 1000,
            cols: 250,
            rows: 50,
            env: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn init_delay(&self) -> Duration {
        Duration::from_millis(self.init_delay_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Ignoring config {}: {}", path.display(), e),
                }
            }
        }
        Self::default()
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &std::path::Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf, String> {
        let path = Self::get_config_path().ok_or("Could not determine config path")?;
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(&path, content)
            .map_err(|e| format!("Failed to write config: {}", e))?;
        Ok(path)
    }

    /// Cassette path with a leading `~` expanded
    pub fn cassette_path(&self) -> Option<PathBuf> {
        let path = self.cassette.as_ref()?;
        match (path.strip_prefix("~"), home_dir()) {
            (Ok(rest), Some(home)) => Some(home.join(rest)),
            _ => Some(path.clone()),
        }
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        let dir = data_dir()?;
        Some(dir.join("config.toml"))
    }
}

/// `~/.pshell`, created on first use
pub fn data_dir() -> Option<PathBuf> {
    let dir = home_dir()?.join(".pshell");
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    Some(dir)
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
