// The #[error] attribute from thiserror uses struct fields via string interpolation,
// but Rust's unused_assignments lint doesn't recognize this.
#![allow(unused_assignments)]

//! Critpath Error Types with Error Codes
//!
//! Error code ranges:
//! - CRITPATH-000-009: Configuration errors (fatal, surfaced to callers)
//! - CRITPATH-010-019: Messaging backend errors
//! - CRITPATH-020-029: Parallel dispatch errors
//! - CRITPATH-090-099: IO/parse errors
//!
//! Only configuration errors escape the analysis API. Messaging and dispatch
//! errors are caught by the fetcher and the parallel adapter, which degrade
//! to "data unavailable" or to sequential replay.

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CritPathError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug, Diagnostic)]
pub enum CritPathError {
    // ═══════════════════════════════════════════
    // CONFIGURATION ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[CRITPATH-001] Invalid replay process count: {count} (must be > 0)")]
    #[diagnostic(
        code(critpath::invalid_replay_processes),
        help("Request at least one replay process")
    )]
    InvalidReplayProcessCount { count: usize },

    #[error("[CRITPATH-002] Missing distribution parameter: {parameter}")]
    #[diagnostic(
        code(critpath::missing_parameter),
        help("Set both the execution and replay process counts before distributing")
    )]
    MissingDistributionParameter { parameter: &'static str },

    #[error("[CRITPATH-003] Requested {requested} replay processes but communicator has {available}")]
    #[diagnostic(
        code(critpath::replay_process_mismatch),
        help("Launch one replay process per rank of the communicator")
    )]
    ReplayProcessMismatch { requested: usize, available: usize },

    #[error("[CRITPATH-004] Configuration error: {reason}")]
    #[diagnostic(code(critpath::config_error))]
    ConfigError { reason: String },

    #[error("[CRITPATH-005] Invalid memory policy '{value}'")]
    #[diagnostic(
        code(critpath::invalid_memory_policy),
        help("Use one of: store, full_recompute, partial_recompute")
    )]
    InvalidMemoryPolicy { value: String },

    // ═══════════════════════════════════════════
    // MESSAGING ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[CRITPATH-010] Messaging backend unavailable: {operation}")]
    #[diagnostic(code(critpath::backend_unavailable))]
    BackendUnavailable { operation: &'static str },

    #[error("[CRITPATH-011] Peer rank {rank} disconnected")]
    #[diagnostic(code(critpath::peer_disconnected))]
    PeerDisconnected { rank: usize },

    #[error("[CRITPATH-012] Rank {rank} out of range for communicator of size {size}")]
    #[diagnostic(code(critpath::invalid_rank))]
    InvalidRank { rank: usize, size: usize },

    #[error("[CRITPATH-013] Message codec error: {0}")]
    #[diagnostic(code(critpath::codec))]
    Codec(#[from] serde_json::Error),

    // ═══════════════════════════════════════════
    // PARALLEL DISPATCH ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[CRITPATH-020] Kernel '{kernel}' failed: {reason}")]
    #[diagnostic(code(critpath::kernel_failed))]
    KernelFailed { kernel: String, reason: String },

    #[error("[CRITPATH-021] Parallel backend '{backend}' panicked")]
    #[diagnostic(code(critpath::backend_panicked))]
    BackendPanicked { backend: String },

    // ═══════════════════════════════════════════
    // IO/PARSE ERRORS (090-099)
    // ═══════════════════════════════════════════
    #[error("[CRITPATH-090] IO error: {0}")]
    #[diagnostic(code(critpath::io))]
    Io(#[from] std::io::Error),

    #[error("[CRITPATH-091] Failed to parse traces from '{path}': {details}")]
    #[diagnostic(
        code(critpath::trace_parse),
        help("Expected a JSON array of traces")
    )]
    TraceParse { path: String, details: String },
}

impl CritPathError {
    /// True for the configuration category, the only one surfaced to callers
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidReplayProcessCount { .. }
                | Self::MissingDistributionParameter { .. }
                | Self::ReplayProcessMismatch { .. }
                | Self::ConfigError { .. }
                | Self::InvalidMemoryPolicy { .. }
        )
    }
}

impl FixSuggestion for CritPathError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            Self::InvalidReplayProcessCount { .. } => {
                Some("Pass --rps with a value of at least 1")
            }
            Self::MissingDistributionParameter { .. } => {
                Some("Call set_execution_processes() and set_replay_processes() first")
            }
            Self::ReplayProcessMismatch { .. } => {
                Some("Match the replay process count to the communicator size")
            }
            Self::ConfigError { .. } => Some("Check ~/.config/critpath/config.toml syntax"),
            Self::InvalidMemoryPolicy { .. } => {
                Some("Use store, full_recompute or partial_recompute")
            }
            Self::BackendUnavailable { .. } => {
                Some("Run with a messaging backend or use single-process mode")
            }
            Self::PeerDisconnected { .. } => Some("Check that every rank is still running"),
            Self::InvalidRank { .. } => Some("Use a rank below the communicator size"),
            Self::Codec(_) => None,
            Self::KernelFailed { .. } | Self::BackendPanicked { .. } => {
                Some("The sequential replay path is used automatically")
            }
            Self::Io(_) => Some("Check file path and permissions"),
            Self::TraceParse { .. } => Some("Validate the trace file with a JSON linter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_codes() {
        let err = CritPathError::InvalidReplayProcessCount { count: 0 };
        assert!(err.to_string().contains("CRITPATH-001"));

        let err = CritPathError::PeerDisconnected { rank: 3 };
        assert!(err.to_string().contains("CRITPATH-011"));
        assert!(err.to_string().contains("rank 3"));
    }

    #[test]
    fn only_configuration_errors_are_configuration() {
        assert!(CritPathError::MissingDistributionParameter {
            parameter: "num_replay_processes"
        }
        .is_configuration());
        assert!(!CritPathError::BackendUnavailable { operation: "send" }.is_configuration());
    }

    #[test]
    fn every_configuration_error_has_a_suggestion() {
        let errors = [
            CritPathError::InvalidReplayProcessCount { count: 0 },
            CritPathError::MissingDistributionParameter { parameter: "x" },
            CritPathError::ReplayProcessMismatch {
                requested: 4,
                available: 2,
            },
            CritPathError::ConfigError {
                reason: "bad".into(),
            },
            CritPathError::InvalidMemoryPolicy {
                value: "lru".into(),
            },
        ];
        for err in &errors {
            assert!(err.fix_suggestion().is_some(), "{err}");
        }
    }
}
