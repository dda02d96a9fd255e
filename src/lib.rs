//! Critpath - distributed critical-path analysis of parallel execution traces
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  trace/     Event, Trace, ProcessMapping                     │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       ANALYSIS LAYER                         │
//! │  replay/    Forward/backward replay with callbacks           │
//! │  cpm/       Critical Path Method, three memory policies      │
//! │  parallel/  Columnar layout, batch dispatch, CPU fallback    │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    DISTRIBUTION LAYER                        │
//! │  distributed/  EP → RP split, messaging, remote event fetch  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`trace`] | Event arena per execution process, message linking |
//! | [`replay`] | `TraceReplayer` with direction-scoped callbacks |
//! | [`cpm`] | `CriticalPathFinding`, `MemoryPolicy`, statistics |
//! | [`distributed`] | `TraceDistributor`, `Communicator`, `EventDataFetcher`, coordinator |
//! | [`parallel`] | `ColumnarTrace`, `ParallelReplayAdapter`, kernels |
//! | [`util`] | String interning |
//! | [`config`] | TOML + env configuration |
//! | [`error`] | Error types with fix suggestions |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL
// ═══════════════════════════════════════════════════════════════
pub mod trace;

// ═══════════════════════════════════════════════════════════════
// ANALYSIS LAYER
// ═══════════════════════════════════════════════════════════════
pub mod cpm;
pub mod parallel;
pub mod replay;

// ═══════════════════════════════════════════════════════════════
// DISTRIBUTION LAYER
// ═══════════════════════════════════════════════════════════════
pub mod distributed;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING - Error handling, configuration, utilities
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;
pub mod util;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

// Error types
pub use error::{CritPathError, FixSuggestion, Result};

// Config types
pub use config::AnalysisConfig;

// Trace types
pub use trace::{Event, EventIndex, EventKind, ProcessId, ProcessMapping, RankId, Trace, TraceInfo};

// Replay types
pub use replay::{Direction, TraceReplayer};

// Analysis types
pub use cpm::{
    AnalysisStats, Boundary, BoundaryExport, CpmOptions, CriticalPathFinding, CriticalPathSummary,
    EventSource, MemoryPolicy,
};

// Distribution types
pub use distributed::{
    compute_distribution, ChannelCommunicator, Communicator, DistributedReplayCoordinator,
    EventDataFetcher, SerialCommunicator, TraceDistributor,
};

// Parallel types
pub use parallel::{to_columnar, ColumnarTrace, DependencyClass, ParallelReplayAdapter};
