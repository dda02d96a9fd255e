//! Replay Module - shared substrate for every trace analysis
//!
//! - `replayer`: [`TraceReplayer`] with direction-scoped callbacks

mod replayer;

pub use replayer::{for_each_event, Direction, ReplayCallback, TraceReplayer};
