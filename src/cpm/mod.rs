//! CPM Module - Critical Path Method over execution traces
//!
//! - `finder`: [`CriticalPathFinding`] two-pass engine
//! - `policy`: [`MemoryPolicy`] and [`CpmOptions`]
//! - `cost`: injectable [`CostModel`]
//! - `stats`: timing/memory instrumentation ([`AnalysisStats`])
//! - `boundary`: partner values exchanged between per-process analyses

mod boundary;
mod cost;
mod finder;
mod policy;
mod stats;

pub use boundary::{Boundary, BoundaryExport, BoundaryValue, EventKey, EventSource};
pub use cost::{ConstantCost, CostModel, DEFAULT_COST};
pub use finder::{
    AnalysisPhase, CriticalEvent, CriticalPathFinding, CriticalPathSummary, DepVec, EventTiming,
    SLACK_EPSILON,
};
pub use policy::{
    CpmOptions, MemoryPolicy, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_PARTIAL_THRESHOLD,
    DEFAULT_SAMPLING_INTERVAL,
};
pub use stats::{peak_rss_bytes, AnalysisStats, MapSizeSample, MapSizes, Phase};
