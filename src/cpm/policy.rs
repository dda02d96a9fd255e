//! Memory policies and analysis options
//!
//! The three policies trade memory for recomputation and must produce
//! identical critical-path lengths and critical-event counts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CritPathError;

/// Default distance between cached checkpoints in recompute policies
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 450;

/// Default in-degree threshold for [`MemoryPolicy::PartialRecompute`]
pub const DEFAULT_PARTIAL_THRESHOLD: usize = 2;

/// Default number of events between memory timeline samples
pub const DEFAULT_SAMPLING_INTERVAL: usize = 1000;

/// How earliest-time values are retained between the two passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MemoryPolicy {
    /// Keep every earliest value, drain them during the backward pass
    #[default]
    Store,
    /// Keep only checkpoints, recompute everything else on demand
    FullRecompute,
    /// Keep values of events whose in-degree is at least `threshold`
    PartialRecompute { threshold: usize },
}

impl MemoryPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::FullRecompute => "full_recompute",
            Self::PartialRecompute { .. } => "partial_recompute",
        }
    }

    /// Whether earliest values may be missing and need recomputation
    pub fn recomputes(&self) -> bool {
        !matches!(self, Self::Store)
    }
}

impl fmt::Display for MemoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PartialRecompute { threshold } => write!(f, "partial_recompute({threshold})"),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for MemoryPolicy {
    type Err = CritPathError;

    /// Accepts `store`, `full_recompute`, `partial_recompute` and
    /// `partial_recompute:<threshold>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let (name, arg) = match normalized.split_once(':') {
            Some((name, arg)) => (name.to_string(), Some(arg.to_string())),
            None => (normalized, None),
        };

        match (name.as_str(), arg) {
            ("store", None) => Ok(Self::Store),
            ("full_recompute" | "full", None) => Ok(Self::FullRecompute),
            ("partial_recompute" | "partial", None) => Ok(Self::PartialRecompute {
                threshold: DEFAULT_PARTIAL_THRESHOLD,
            }),
            ("partial_recompute" | "partial", Some(arg)) => arg
                .parse()
                .map(|threshold| Self::PartialRecompute { threshold })
                .map_err(|_| CritPathError::InvalidMemoryPolicy {
                    value: s.to_string(),
                }),
            _ => Err(CritPathError::InvalidMemoryPolicy {
                value: s.to_string(),
            }),
        }
    }
}

/// Options for a [`CriticalPathFinding`](super::CriticalPathFinding) run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpmOptions {
    pub policy: MemoryPolicy,
    /// Per-process distance between cached checkpoints (>= 1)
    pub checkpoint_interval: usize,
    pub enable_memory_tracking: bool,
    /// Events between two timeline samples when tracking memory
    pub sampling_interval: usize,
}

impl Default for CpmOptions {
    fn default() -> Self {
        Self {
            policy: MemoryPolicy::Store,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            enable_memory_tracking: false,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
        }
    }
}

impl CpmOptions {
    pub fn with_policy(mut self, policy: MemoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_memory_tracking(mut self, sampling_interval: usize) -> Self {
        self.enable_memory_tracking = true;
        self.sampling_interval = sampling_interval;
        self
    }

    /// Checkpoint interval clamped to at least 1
    #[inline]
    pub(crate) fn effective_interval(&self) -> u64 {
        self.checkpoint_interval.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_policy_names() {
        assert_eq!("store".parse::<MemoryPolicy>().unwrap(), MemoryPolicy::Store);
        assert_eq!(
            "Full-Recompute".parse::<MemoryPolicy>().unwrap(),
            MemoryPolicy::FullRecompute
        );
        assert_eq!(
            "partial".parse::<MemoryPolicy>().unwrap(),
            MemoryPolicy::PartialRecompute {
                threshold: DEFAULT_PARTIAL_THRESHOLD
            }
        );
        assert_eq!(
            "partial_recompute:3".parse::<MemoryPolicy>().unwrap(),
            MemoryPolicy::PartialRecompute { threshold: 3 }
        );
    }

    #[test]
    fn parse_invalid_policy() {
        let err = "lru".parse::<MemoryPolicy>().unwrap_err();
        assert!(err.to_string().contains("CRITPATH-005"));
        assert!("partial:x".parse::<MemoryPolicy>().is_err());
        assert!("store:1".parse::<MemoryPolicy>().is_err());
    }

    #[test]
    fn display_includes_threshold() {
        assert_eq!(
            MemoryPolicy::PartialRecompute { threshold: 4 }.to_string(),
            "partial_recompute(4)"
        );
        assert_eq!(MemoryPolicy::Store.to_string(), "store");
    }

    #[test]
    fn zero_interval_is_clamped() {
        let options = CpmOptions::default().with_checkpoint_interval(0);
        assert_eq!(options.effective_interval(), 1);
    }
}
