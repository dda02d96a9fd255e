//! ParallelReplayAdapter - batch dispatch with a guaranteed sequential path
//!
//! A kernel is offered to the parallel backend only when:
//! - a backend is configured and reports itself available
//! - the kernel declares [`DependencyClass::Independent`]
//!
//! Everything else, including backend errors and panics, falls back to the
//! callback replay of [`TraceReplayer`]. Nothing here is fatal.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::columnar::{to_columnar, ColumnarTrace};
use crate::error::{CritPathError, Result};
use crate::replay::{Direction, TraceReplayer};
use crate::trace::{Event, EventKind, Trace};

/// Cross-event dependencies an analysis needs honoured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DependencyClass {
    /// Each event can be processed in isolation
    Independent,
    /// Depends on earlier events of the same process
    IntraProcess,
    /// Depends on events of other processes
    InterProcess,
    #[default]
    Full,
}

impl DependencyClass {
    pub fn is_data_parallel(self) -> bool {
        self == Self::Independent
    }
}

/// Analysis runnable either per event or over whole columns
pub trait ReplayKernel: Send {
    fn name(&self) -> &str;

    fn dependency(&self) -> DependencyClass {
        DependencyClass::Full
    }

    /// Sequential path: one call per event in replay order
    fn on_event(&mut self, event: &Event);

    /// Batch path: one call with every column (already reversed for backward)
    fn on_columns(&mut self, columns: &ColumnarTrace) -> Result<()>;

    /// Discard partial results before the sequential retry
    fn reset(&mut self) {}
}

/// Device executing kernels over columns
pub trait ParallelBackend: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    fn launch(&self, kernel: &mut dyn ReplayKernel, columns: &ColumnarTrace) -> Result<()>;
}

/// Runs the batch path on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl ParallelBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn launch(&self, kernel: &mut dyn ReplayKernel, columns: &ColumnarTrace) -> Result<()> {
        kernel.on_columns(columns)
    }
}

/// Which path a dispatch ended up taking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPath {
    Parallel,
    Sequential,
}

pub struct ParallelReplayAdapter {
    replayer: TraceReplayer,
    backend: Option<Arc<dyn ParallelBackend>>,
}

impl ParallelReplayAdapter {
    /// Adapter without a backend: every dispatch is sequential
    pub fn new(trace: Option<Arc<Trace>>) -> Self {
        let replayer = match trace {
            Some(trace) => TraceReplayer::with_trace(trace),
            None => TraceReplayer::new(),
        };
        Self {
            replayer,
            backend: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ParallelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn set_trace(&mut self, trace: Arc<Trace>) {
        self.replayer.set_trace(trace);
    }

    pub fn replayer_mut(&mut self) -> &mut TraceReplayer {
        &mut self.replayer
    }

    pub fn backend_available(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_available())
    }

    /// Columns of the current trace, if any
    pub fn to_columnar(&self) -> Option<ColumnarTrace> {
        self.replayer.trace().map(|t| to_columnar(t))
    }

    /// Run `kernel` over the current trace in `direction`
    #[instrument(skip(self, kernel), fields(kernel = kernel.name()))]
    pub fn dispatch(&mut self, kernel: &mut dyn ReplayKernel, direction: Direction) -> DispatchPath {
        match self.try_parallel(kernel, direction) {
            Ok(true) => return DispatchPath::Parallel,
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Parallel dispatch failed, replaying sequentially");
                kernel.reset();
            }
        }
        self.replayer
            .replay_with(direction, |event| kernel.on_event(event));
        DispatchPath::Sequential
    }

    /// Ok(false) when the parallel path does not apply
    fn try_parallel(&self, kernel: &mut dyn ReplayKernel, direction: Direction) -> Result<bool> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(false);
        };
        if !backend.is_available() {
            debug!(backend = backend.name(), "Backend unavailable");
            return Ok(false);
        }
        if !kernel.dependency().is_data_parallel() {
            debug!(dependency = ?kernel.dependency(), "Kernel is not data-parallel");
            return Ok(false);
        }
        let Some(trace) = self.replayer.trace() else {
            return Ok(false);
        };

        let columns = match direction {
            Direction::Forward => to_columnar(trace),
            Direction::Backward => to_columnar(trace).reversed(),
        };
        panic::catch_unwind(AssertUnwindSafe(|| backend.launch(kernel, &columns))).map_err(
            |_| CritPathError::BackendPanicked {
                backend: backend.name().to_string(),
            },
        )??;
        Ok(true)
    }
}

impl std::fmt::Debug for ParallelReplayAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelReplayAdapter")
            .field("replayer", &self.replayer)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
// Reference kernel
// ═══════════════════════════════════════════════════════════════

/// Histogram of event kinds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventKindCounter {
    counts: [usize; EventKind::ALL.len()],
}

impl EventKindCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.counts[kind.code() as usize]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    fn bump(&mut self, code: u8) {
        let slot = EventKind::from_code(code).code() as usize;
        self.counts[slot] += 1;
    }
}

impl ReplayKernel for EventKindCounter {
    fn name(&self) -> &str {
        "event_kind_counter"
    }

    fn dependency(&self) -> DependencyClass {
        DependencyClass::Independent
    }

    fn on_event(&mut self, event: &Event) {
        self.bump(event.kind.code());
    }

    fn on_columns(&mut self, columns: &ColumnarTrace) -> Result<()> {
        for code in &columns.kinds {
            self.bump(*code);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.counts = Default::default();
    }
}
