//! Configuration management for ioproc.
//!
//! This module provides TOML configuration file loading from
//! `~/.ioproc/config.toml`. Every field is optional and falls back to its
//! default, and command line flags override whatever the file says.
//!
//! # Configuration File
//!
//! ```toml
//! # Child command (optional, the command line wins if given)
//! command = "./bin/sokoban_test -p astar -w 10"
//!
//! # Give stderr its own queue instead of merging it into stdout
//! capture_stderr = true
//!
//! # Log level for ~/.ioproc/ioproc.log
//! log_level = "info"
//!
//! [console]
//! prompt = ">>> "
//! exit_command = "EXIT"
//! color = true
//!
//! [timing]
//! poll_interval_ms = 1
//! startup_delay_ms = 200
//! input_settle_ms = 100
//! ```

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default child command
    pub command: Option<String>,
    /// Capture stderr separately
    pub capture_stderr: bool,
    /// Log filter directive
    pub log_level: String,
    /// Line-mode console settings
    pub console: ConsoleConfig,
    /// Polling and delay settings
    pub timing: TimingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: None,
            capture_stderr: true,
            log_level: "info".to_string(),
            console: ConsoleConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// Line-mode console configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Prompt printed to stderr before reading input
    pub prompt: String,
    /// Input line that ends the session after being forwarded
    pub exit_command: String,
    /// Colour prompt and stderr lines
    pub color: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            prompt: ">>> ".to_string(),
            exit_command: "EXIT".to_string(),
            color: true,
        }
    }
}

/// Timing configuration, all in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Sleep between readiness polls
    pub poll_interval_ms: u64,
    /// Grace period after launch before the first prompt
    pub startup_delay_ms: u64,
    /// Pause after forwarding input so the child can answer
    pub input_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1,
            startup_delay_ms: 200,
            input_settle_ms: 100,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn input_settle(&self) -> Duration {
        Duration::from_millis(self.input_settle_ms)
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                match fs::read_to_string(&path) {
                    Ok(content) => match Self::from_toml_str(&content) {
                        Ok(config) => return config,
                        Err(e) => warn!("Ignoring invalid config {}: {}", path.display(), e),
                    },
                    Err(e) => warn!("Failed to read config {}: {}", path.display(), e),
                }
            }
        }
        Self::default()
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), String> {
        if let Some(path) = Self::get_config_path() {
            let content = toml::to_string_pretty(self)
                .map_err(|e| format!("Failed to serialize config: {}", e))?;
            fs::write(&path, content)
                .map_err(|e| format!("Failed to write config: {}", e))?;
            Ok(())
        } else {
            Err("Could not determine config path".to_string())
        }
    }

    /// Directory holding config and log files
    pub fn config_dir() -> Option<PathBuf> {
        let dir = home_dir()?.join(".ioproc");
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir)
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
