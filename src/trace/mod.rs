//! Trace Module - event/trace data model consumed by every analysis
//!
//! - `event`: [`Event`], [`EventKind`], [`P2PFields`]
//! - `store`: [`Trace`] arena and [`TraceInfo`]
//! - `mapping`: [`ProcessMapping`] (EP → RP)
//!
//! Format-specific readers live outside this crate; they only need to
//! populate these types.

mod event;
mod mapping;
mod store;

pub use event::{Event, EventIndex, EventKind, P2PFields, ProcessId, RankId, ThreadId};
pub use mapping::ProcessMapping;
pub use store::{Trace, TraceInfo};
