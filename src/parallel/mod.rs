//! Parallel Module - columnar layout and batch dispatch
//!
//! - `columnar`: [`ColumnarTrace`] structure-of-arrays conversion
//! - `adapter`: [`ParallelReplayAdapter`], [`ReplayKernel`], [`ParallelBackend`]

mod adapter;
mod columnar;

pub use adapter::{
    CpuBackend, DependencyClass, DispatchPath, EventKindCounter, ParallelBackend,
    ParallelReplayAdapter, ReplayKernel,
};
pub use columnar::{to_columnar, ColumnarTrace, NO_PARTNER};
