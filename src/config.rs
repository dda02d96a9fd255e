//! Critpath Configuration Module
//!
//! Analysis defaults stored in `~/.config/critpath/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`CRITPATH_*`)
//! 2. Config file (`~/.config/critpath/config.toml` or an explicit path)
//! 3. Defaults
//!
//! Values are handed to constructors explicitly; nothing here is global.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cpm::{
    CpmOptions, MemoryPolicy, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_PARTIAL_THRESHOLD,
    DEFAULT_SAMPLING_INTERVAL,
};
use crate::error::{CritPathError, Result};

pub const ENV_MEMORY_POLICY: &str = "CRITPATH_MEMORY_POLICY";
pub const ENV_PARTIAL_THRESHOLD: &str = "CRITPATH_PARTIAL_THRESHOLD";
pub const ENV_CHECKPOINT_INTERVAL: &str = "CRITPATH_CHECKPOINT_INTERVAL";
pub const ENV_TRACK_MEMORY: &str = "CRITPATH_TRACK_MEMORY";
pub const ENV_REPLAY_PROCESSES: &str = "CRITPATH_REPLAY_PROCESSES";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// store, full_recompute or partial_recompute
    pub memory_policy: String,

    /// Predecessor count at or above which partial mode stores values
    pub partial_threshold: usize,

    /// Per-process distance between checkpoints, at least 1
    pub checkpoint_interval: usize,

    pub enable_memory_tracking: bool,

    /// Events between two memory timeline samples
    pub sampling_interval: usize,

    /// Replay process count for `distribute`, if not given on the command line
    pub replay_processes: Option<usize>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            memory_policy: "store".to_string(),
            partial_threshold: DEFAULT_PARTIAL_THRESHOLD,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            enable_memory_tracking: false,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            replay_processes: None,
        }
    }
}

fn config_error(reason: impl Into<String>) -> CritPathError {
    CritPathError::ConfigError {
        reason: reason.into(),
    }
}

/// Read `key` and parse it, ignoring unset or empty variables
fn env_value<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| config_error(format!("{key}: cannot parse '{raw}'"))),
        _ => Ok(None),
    }
}

fn env_flag(key: &str) -> Result<Option<bool>> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(config_error(format!("{key}: expected a boolean, got '{raw}'"))),
        },
        Err(_) => Ok(None),
    }
}

impl AnalysisConfig {
    /// Returns `~/.config/critpath/` on Unix, `%APPDATA%/critpath/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("critpath")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load the default config file, or defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load an explicit config file. Missing or malformed files are errors.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            config_error(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| config_error(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables, which take precedence
    pub fn with_env(mut self) -> Result<Self> {
        if let Some(policy) = env_value::<String>(ENV_MEMORY_POLICY)? {
            self.memory_policy = policy;
        }
        if let Some(threshold) = env_value(ENV_PARTIAL_THRESHOLD)? {
            self.partial_threshold = threshold;
        }
        if let Some(interval) = env_value(ENV_CHECKPOINT_INTERVAL)? {
            self.checkpoint_interval = interval;
        }
        if let Some(track) = env_flag(ENV_TRACK_MEMORY)? {
            self.enable_memory_tracking = track;
        }
        if let Some(rps) = env_value(ENV_REPLAY_PROCESSES)? {
            self.replay_processes = Some(rps);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_interval == 0 {
            return Err(config_error("checkpoint_interval must be at least 1"));
        }
        if self.sampling_interval == 0 {
            return Err(config_error("sampling_interval must be at least 1"));
        }
        if self.replay_processes == Some(0) {
            return Err(CritPathError::InvalidReplayProcessCount { count: 0 });
        }
        self.memory_policy().map(|_| ())
    }

    /// Typed policy. `partial_threshold` applies unless the name carries its own.
    pub fn memory_policy(&self) -> Result<MemoryPolicy> {
        let has_inline_threshold = self.memory_policy.contains(':');
        match self.memory_policy.parse::<MemoryPolicy>()? {
            MemoryPolicy::PartialRecompute { .. } if !has_inline_threshold => {
                Ok(MemoryPolicy::PartialRecompute {
                    threshold: self.partial_threshold,
                })
            }
            policy => Ok(policy),
        }
    }

    pub fn cpm_options(&self) -> Result<CpmOptions> {
        Ok(CpmOptions {
            policy: self.memory_policy()?,
            checkpoint_interval: self.checkpoint_interval,
            enable_memory_tracking: self.enable_memory_tracking,
            sampling_interval: self.sampling_interval,
        })
    }
}
