//! CriticalPathFinding - two-pass Critical Path Method over a trace
//!
//! Lifecycle: `Idle → ForwardPass → BackwardPass → Extracted`, `clear()`
//! returns to `Idle` from any state.
//!
//! Dependency edges:
//! - same-process: immediately preceding event → next event
//! - cross-process: Send → matched Recv (only when the Send was replayed
//!   before the Recv; unresolved receives get no cross-process edge)
//! - cross-trace: a Recv whose sender is not in this trace starts no earlier
//!   than the Send's finish from the [`Boundary`], and such a Send finishes
//!   no later than the Recv's latest start
//!
//! Recomputation is iterative (explicit stack) and stops at stored values,
//! so its depth is bounded by the checkpoint interval, not the trace length.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, info, instrument, warn};

use super::boundary::{Boundary, BoundaryExport, BoundaryValue, EventKey, EventSource};
use super::cost::{ConstantCost, CostModel};
use super::policy::{CpmOptions, MemoryPolicy};
use super::stats::{peak_rss_bytes, AnalysisStats, MapSizes, MemoryTracker, Phase};
use crate::replay::{Direction, TraceReplayer};
use crate::trace::{Event, EventIndex, EventKind, ProcessId, Trace};

/// Events with |slack| below this are on the critical path
pub const SLACK_EPSILON: f64 = 1e-9;

/// Stack-allocated edge list: most events have 1-2 neighbours
pub type DepVec = SmallVec<[EventIndex; 4]>;

/// Position in the analysis lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPhase {
    Idle,
    ForwardPass,
    BackwardPass,
    Extracted,
}

/// CPM values of one event
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EventTiming {
    pub earliest_start: f64,
    pub earliest_finish: f64,
    pub latest_start: f64,
    pub latest_finish: f64,
    pub slack: f64,
}

impl EventTiming {
    #[inline]
    pub fn is_critical(&self) -> bool {
        self.slack.abs() < SLACK_EPSILON
    }
}

/// Event on the critical path with its earliest times
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalEvent {
    pub event: Event,
    pub earliest_start: f64,
    pub earliest_finish: f64,
}

/// Compact, transferable result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalPathSummary {
    pub execution_process_id: Option<ProcessId>,
    pub events: usize,
    pub length: f64,
    pub critical_events: usize,
    /// Critical event indices ordered by earliest start
    pub critical_indices: Vec<EventIndex>,
}

// ═══════════════════════════════════════════════════════════════
// Algorithm state
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct CpmState {
    cost: FxHashMap<EventIndex, f64>,
    predecessors: FxHashMap<EventIndex, DepVec>,
    successors: FxHashMap<EventIndex, DepVec>,
    earliest_start: FxHashMap<EventIndex, f64>,
    earliest_finish: FxHashMap<EventIndex, f64>,
    latest_start: FxHashMap<EventIndex, f64>,
    latest_finish: FxHashMap<EventIndex, f64>,
    slack: FxHashMap<EventIndex, f64>,
    /// Per-process last event and its earliest finish (forward pass only)
    last_event: FxHashMap<ProcessId, (EventIndex, f64)>,
    /// Replayed Sends whose Recv has not been replayed (forward pass only)
    open_sends: FxHashMap<EventIndex, OpenSend>,
    /// Earliest start imposed by a Send in another trace
    start_floor: FxHashMap<EventIndex, f64>,
    /// Validated partners living in other traces
    remote_partner: FxHashMap<EventIndex, EventKey>,
    export: BoundaryExport,
    /// Per-process event counter, drives checkpoint placement
    process_position: FxHashMap<ProcessId, u64>,
    max_finish: f64,
    critical: Vec<CriticalEvent>,
    stored_events: usize,
    recomputed_events: usize,
    checkpoint_count: usize,
    max_recompute_span: usize,
}

#[derive(Debug, Clone, Copy)]
struct OpenSend {
    process: ProcessId,
    partner: Option<EventIndex>,
    finish: f64,
}

/// Read-only inputs of one run
struct PassScope<'a> {
    options: &'a CpmOptions,
    boundary: &'a Boundary,
    source: Option<&'a dyn EventSource>,
    local_processes: BTreeSet<ProcessId>,
}

impl PassScope<'_> {
    #[inline]
    fn is_local(&self, process: ProcessId) -> bool {
        self.local_processes.contains(&process)
    }
}

impl CpmState {
    fn sizes(&self) -> MapSizes {
        MapSizes {
            cost: self.cost.len(),
            predecessors: self.predecessors.len(),
            successors: self.successors.len(),
            earliest_start: self.earliest_start.len(),
            earliest_finish: self.earliest_finish.len(),
            latest_start: self.latest_start.len(),
            latest_finish: self.latest_finish.len(),
            slack: self.slack.len(),
        }
    }

    fn estimated_bytes(&self) -> usize {
        const SCALAR: usize = std::mem::size_of::<EventIndex>() + std::mem::size_of::<f64>();
        const EDGES: usize = std::mem::size_of::<EventIndex>() + std::mem::size_of::<DepVec>();
        let sizes = self.sizes();
        let scalars = sizes.cost
            + sizes.earliest_start
            + sizes.earliest_finish
            + sizes.latest_start
            + sizes.latest_finish
            + sizes.slack;
        scalars * SCALAR + (sizes.predecessors + sizes.successors) * EDGES
    }

    #[inline]
    fn stored(&self, index: EventIndex) -> Option<(f64, f64)> {
        let start = self.earliest_start.get(&index)?;
        let finish = self.earliest_finish.get(&index)?;
        Some((*start, *finish))
    }

    #[inline]
    fn preds_of(&self, index: EventIndex) -> &[EventIndex] {
        self.predecessors
            .get(&index)
            .map_or(&[][..], SmallVec::as_slice)
    }

    /// Earliest (start, finish) of an already replayed event
    fn earliest(&mut self, index: EventIndex) -> (f64, f64) {
        match self.stored(index) {
            Some(values) => values,
            None => self.recompute(index),
        }
    }

    /// Rebuild earliest values by walking predecessors back to stored ones.
    ///
    /// Iterative post-order walk; values computed here live only for the
    /// duration of the call.
    fn recompute(&mut self, target: EventIndex) -> (f64, f64) {
        let mut memo: FxHashMap<EventIndex, (f64, f64)> = FxHashMap::default();
        let mut stack: Vec<(EventIndex, bool)> = vec![(target, false)];

        while let Some((node, expanded)) = stack.pop() {
            if memo.contains_key(&node) {
                continue;
            }
            if expanded {
                let mut start = self.start_floor.get(&node).copied().unwrap_or(0.0);
                for pred in self.preds_of(node) {
                    let finish = match self.stored(*pred) {
                        Some((_, finish)) => finish,
                        None => memo.get(pred).map_or(0.0, |v| v.1),
                    };
                    start = start.max(finish);
                }
                let finish = start + self.cost.get(&node).copied().unwrap_or(0.0);
                memo.insert(node, (start, finish));
            } else {
                stack.push((node, true));
                for pred in self.preds_of(node) {
                    if self.stored(*pred).is_none() && !memo.contains_key(pred) {
                        stack.push((*pred, false));
                    }
                }
            }
        }

        self.recomputed_events += memo.len();
        self.max_recompute_span = self.max_recompute_span.max(memo.len());
        memo.get(&target).copied().unwrap_or((0.0, 0.0))
    }

    /// Matching Send of a Recv within this trace, with its earliest finish.
    ///
    /// The Send must be replayed already, live on the Recv's sender and not
    /// point at another Recv.
    fn take_local_send(&mut self, recv: &Event) -> Option<(EventIndex, f64)> {
        let send = recv.partner_index()?;
        let sender = recv.partner_process_id()?;
        match self.open_sends.get(&send) {
            Some(open)
                if open.process == sender && open.partner.map_or(true, |p| p == recv.index) =>
            {
                let finish = open.finish;
                self.open_sends.remove(&send);
                Some((send, finish))
            }
            Some(open) => {
                warn!(
                    recv = recv.index,
                    send,
                    sender,
                    actual_process = open.process,
                    "Recv partner is not its matching Send, edge skipped"
                );
                None
            }
            None if self.cost.contains_key(&send) => {
                warn!(recv = recv.index, send, "Recv partner is not an open Send, edge skipped");
                None
            }
            // Not replayed yet or absent from the trace
            None => None,
        }
    }

    /// Partner of a Send/Recv that lives in another trace, once checked.
    ///
    /// Only partners replayed before the Recv count. With an event source,
    /// the partner must exist with the opposite kind on the named process.
    fn remote_partner_of(&self, event: &Event, scope: &PassScope<'_>) -> Option<EventKey> {
        let process = event.partner_process_id()?;
        let partner = event.partner_index()?;
        let in_order = if event.is_send() {
            partner > event.index
        } else {
            partner < event.index
        };
        if !in_order {
            return None;
        }
        if let Some(source) = scope.source {
            let Some(found) = source.event(process, partner) else {
                debug!(index = event.index, process, partner, "Remote partner unavailable");
                return None;
            };
            let expected = if event.is_send() {
                EventKind::Recv
            } else {
                EventKind::Send
            };
            let points_back = found.partner_index().map_or(true, |p| p == event.index);
            if found.kind != expected || found.process_id != process || !points_back {
                warn!(
                    index = event.index,
                    process,
                    partner,
                    found = %found.kind,
                    "Remote partner does not match, edge skipped"
                );
                return None;
            }
        }
        Some((process, partner))
    }

    fn forward_step(&mut self, event: &Event, cost: f64, scope: &PassScope<'_>) {
        let index = event.index;
        let process = event.process_id;

        let mut preds = DepVec::new();
        let mut earliest_start = 0.0_f64;
        if let Some(&(prior, prior_finish)) = self.last_event.get(&process) {
            preds.push(prior);
            earliest_start = earliest_start.max(prior_finish);
        }
        let partner_is_local = event.partner_process_id().map_or(true, |p| scope.is_local(p));
        if event.is_recv() {
            if partner_is_local {
                if let Some((send, finish)) = self.take_local_send(event) {
                    if !preds.contains(&send) {
                        preds.push(send);
                    }
                    earliest_start = earliest_start.max(finish);
                }
            } else if let Some(key) = self.remote_partner_of(event, scope) {
                self.remote_partner.insert(index, key);
                if let Some(floor) = scope.boundary.send_finish(key) {
                    self.start_floor.insert(index, floor);
                    earliest_start = earliest_start.max(floor);
                }
            }
        }
        self.cost.insert(index, cost);
        let earliest_finish = earliest_start + cost;

        if event.is_send() {
            if partner_is_local {
                self.open_sends.insert(
                    index,
                    OpenSend {
                        process,
                        partner: event.partner_index(),
                        finish: earliest_finish,
                    },
                );
            } else if let Some(key) = self.remote_partner_of(event, scope) {
                self.remote_partner.insert(index, key);
                self.export.send_finish.push(BoundaryValue {
                    process_id: process,
                    index,
                    value: earliest_finish,
                });
            }
        }

        for pred in &preds {
            self.successors.entry(*pred).or_default().push(index);
        }
        let in_degree = preds.len();
        if !preds.is_empty() {
            self.predecessors.insert(index, preds);
        }

        let counter = self.process_position.entry(process).or_insert(0);
        let checkpoint = *counter % scope.options.effective_interval() == 0;
        *counter += 1;

        let keep = match scope.options.policy {
            MemoryPolicy::Store => true,
            MemoryPolicy::FullRecompute => checkpoint,
            MemoryPolicy::PartialRecompute { threshold } => in_degree >= threshold || checkpoint,
        };
        if keep {
            self.earliest_start.insert(index, earliest_start);
            self.earliest_finish.insert(index, earliest_finish);
            self.stored_events += 1;
            if checkpoint && scope.options.policy.recomputes() {
                self.checkpoint_count += 1;
            }
        }

        self.last_event.insert(process, (index, earliest_finish));
        self.max_finish = self.max_finish.max(earliest_finish);
    }

    /// Drop what only the forward pass needs
    fn finish_forward(&mut self) {
        self.last_event = FxHashMap::default();
        self.open_sends = FxHashMap::default();
        self.export.max_finish = self.max_finish;
    }

    fn backward_step(&mut self, event: &Event, critical_path_length: f64, scope: &PassScope<'_>) {
        let index = event.index;
        let Some(&cost) = self.cost.get(&index) else {
            return;
        };

        let remote = self.remote_partner.remove(&index);
        let ceiling = remote
            .filter(|_| event.is_send())
            .and_then(|key| scope.boundary.recv_latest_start(key));
        let successors = self.successors.remove(&index).unwrap_or_default();
        let latest_finish = successors
            .iter()
            .filter_map(|s| self.latest_start.get(s).copied())
            .chain(ceiling)
            .reduce(f64::min)
            .unwrap_or(critical_path_length);
        let latest_start = latest_finish - cost;

        let (earliest_start, earliest_finish) = self.earliest(index);
        let slack = latest_start - earliest_start;

        self.latest_start.insert(index, latest_start);
        self.latest_finish.insert(index, latest_finish);
        self.slack.insert(index, slack);
        if remote.is_some() && event.is_recv() {
            self.export.recv_latest_start.push(BoundaryValue {
                process_id: event.process_id,
                index,
                value: latest_start,
            });
        }

        // Read-once: earlier events never need these values again
        self.earliest_start.remove(&index);
        self.earliest_finish.remove(&index);
        self.start_floor.remove(&index);

        if slack.abs() < SLACK_EPSILON {
            self.critical.push(CriticalEvent {
                event: event.clone(),
                earliest_start,
                earliest_finish,
            });
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Public analyzer
// ═══════════════════════════════════════════════════════════════

/// Critical Path Method analysis of one trace
pub struct CriticalPathFinding {
    replayer: TraceReplayer,
    options: CpmOptions,
    cost_model: Box<dyn CostModel>,
    boundary: Arc<Boundary>,
    state: CpmState,
    phase: AnalysisPhase,
    critical_path: Vec<CriticalEvent>,
    critical_path_length: f64,
    stats: Option<AnalysisStats>,
}

impl CriticalPathFinding {
    pub fn new(trace: Option<Arc<Trace>>, options: CpmOptions) -> Self {
        let replayer = match trace {
            Some(trace) => TraceReplayer::with_trace(trace),
            None => TraceReplayer::new(),
        };
        Self {
            replayer,
            options,
            cost_model: Box::new(ConstantCost::default()),
            boundary: Arc::new(Boundary::default()),
            state: CpmState::default(),
            phase: AnalysisPhase::Idle,
            critical_path: Vec::new(),
            critical_path_length: 0.0,
            stats: None,
        }
    }

    /// Replace the per-event cost strategy
    pub fn with_cost_model(mut self, model: impl CostModel + 'static) -> Self {
        self.cost_model = Box::new(model);
        self
    }

    /// Analyse a different trace (resets all results)
    pub fn set_trace(&mut self, trace: Arc<Trace>) {
        self.clear();
        self.replayer.set_trace(trace);
    }

    /// Values of partners in other traces used by the next run
    pub fn set_boundary(&mut self, boundary: Arc<Boundary>) {
        self.boundary = boundary;
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    pub fn options(&self) -> &CpmOptions {
        &self.options
    }

    pub fn phase(&self) -> AnalysisPhase {
        self.phase
    }

    /// Extra callbacks registered here run alongside the CPM passes
    pub fn replayer_mut(&mut self) -> &mut TraceReplayer {
        &mut self.replayer
    }

    /// Forward pass, backward pass and extraction.
    ///
    /// Returns the critical path length. A previous run is cleared first;
    /// without a trace nothing happens and 0.0 is returned.
    pub fn run(&mut self) -> f64 {
        self.run_inner(None)
    }

    /// Like [`CriticalPathFinding::run`], checking every partner outside
    /// the trace against `source` before its boundary value is used
    pub fn run_with_source(&mut self, source: &dyn EventSource) -> f64 {
        self.run_inner(Some(source))
    }

    #[instrument(skip(self, source), fields(policy = %self.options.policy))]
    fn run_inner(&mut self, source: Option<&dyn EventSource>) -> f64 {
        if self.phase != AnalysisPhase::Idle {
            self.clear();
        }
        let Some(trace) = self.replayer.trace().cloned() else {
            debug!("No trace set, nothing to analyse");
            return 0.0;
        };

        let started = Instant::now();
        let mut tracker = MemoryTracker::new(
            self.options.enable_memory_tracking,
            self.options.sampling_interval,
        );
        let mut stats = AnalysisStats {
            trace_bytes: trace.estimated_bytes(),
            ..AnalysisStats::default()
        };
        let scope = PassScope {
            options: &self.options,
            boundary: &self.boundary,
            source,
            local_processes: trace.process_ids(),
        };

        // ─── Forward pass ───
        self.phase = AnalysisPhase::ForwardPass;
        stats.forward_start_bytes = self.sample(&mut tracker, Phase::Forward, 0);
        let pass_started = Instant::now();
        {
            let state = &mut self.state;
            let scope = &scope;
            let cost_model = &*self.cost_model;
            let tracker = &mut tracker;
            let mut position = 0usize;
            self.replayer.replay_with(Direction::Forward, |event| {
                state.forward_step(event, cost_model.cost(event), scope);
                position += 1;
                if tracker.enabled() {
                    tracker.tick(Phase::Forward, position, state.sizes(), state.estimated_bytes());
                }
            });
        }
        self.state.finish_forward();
        stats.forward_time_s = pass_started.elapsed().as_secs_f64();
        stats.forward_end_bytes = self.sample(&mut tracker, Phase::Forward, trace.len());

        self.critical_path_length = scope
            .boundary
            .path_length()
            .map_or(self.state.max_finish, |length| length.max(self.state.max_finish));
        debug!(
            events = trace.len(),
            stored = self.state.stored_events,
            length = self.critical_path_length,
            "Forward pass complete"
        );

        // ─── Backward pass ───
        self.phase = AnalysisPhase::BackwardPass;
        stats.backward_start_bytes = self.sample(&mut tracker, Phase::Backward, 0);
        let pass_started = Instant::now();
        {
            let state = &mut self.state;
            let scope = &scope;
            let length = self.critical_path_length;
            let tracker = &mut tracker;
            let mut position = 0usize;
            self.replayer.replay_with(Direction::Backward, |event| {
                state.backward_step(event, length, scope);
                position += 1;
                if tracker.enabled() {
                    tracker.tick(Phase::Backward, position, state.sizes(), state.estimated_bytes());
                }
            });
        }
        stats.backward_time_s = pass_started.elapsed().as_secs_f64();
        stats.backward_end_bytes = self.sample(&mut tracker, Phase::Backward, trace.len());
        debug!(
            recomputed = self.state.recomputed_events,
            critical = self.state.critical.len(),
            "Backward pass complete"
        );

        self.extract();

        stats.total_time_s = started.elapsed().as_secs_f64();
        stats.peak_bytes = tracker.peak_bytes();
        stats.timeline = tracker.take_timeline();
        if self.options.enable_memory_tracking {
            stats.peak_rss_bytes = peak_rss_bytes();
        }
        stats.stored_events = self.state.stored_events;
        stats.recomputed_events = self.state.recomputed_events;
        stats.checkpoint_count = self.state.checkpoint_count;
        stats.max_recompute_span = self.state.max_recompute_span;

        info!(
            events = trace.len(),
            length = self.critical_path_length,
            critical_events = self.critical_path.len(),
            total_time_s = stats.total_time_s,
            "Critical path analysis complete"
        );
        self.stats = Some(stats);
        self.critical_path_length
    }

    fn sample(&self, tracker: &mut MemoryTracker, phase: Phase, position: usize) -> usize {
        tracker.record(phase, position, self.state.sizes(), self.state.estimated_bytes())
    }

    fn extract(&mut self) {
        let mut critical = std::mem::take(&mut self.state.critical);
        // Collected in reverse replay order; stable sort keeps replay order on ties
        critical.reverse();
        critical.sort_by(|a, b| a.earliest_start.total_cmp(&b.earliest_start));
        self.critical_path = critical;
        self.phase = AnalysisPhase::Extracted;
    }

    /// Reset every map, result and counter. Safe to call at any time.
    pub fn clear(&mut self) {
        self.state = CpmState::default();
        self.critical_path.clear();
        self.critical_path_length = 0.0;
        self.stats = None;
        self.phase = AnalysisPhase::Idle;
    }

    // ═══════════════════════════════════════════
    // Results
    // ═══════════════════════════════════════════

    /// Critical events ordered by earliest start
    pub fn critical_path(&self) -> &[CriticalEvent] {
        &self.critical_path
    }

    pub fn critical_indices(&self) -> Vec<EventIndex> {
        self.critical_path.iter().map(|c| c.event.index).collect()
    }

    pub fn critical_path_length(&self) -> f64 {
        self.critical_path_length
    }

    pub fn latest_start(&self, index: EventIndex) -> Option<f64> {
        self.state.latest_start.get(&index).copied()
    }

    pub fn latest_finish(&self, index: EventIndex) -> Option<f64> {
        self.state.latest_finish.get(&index).copied()
    }

    pub fn slack(&self, index: EventIndex) -> Option<f64> {
        self.state.slack.get(&index).copied()
    }

    pub fn is_critical(&self, index: EventIndex) -> bool {
        self.slack(index).is_some_and(|s| s.abs() < SLACK_EPSILON)
    }

    /// All CPM values of an event after the backward pass.
    ///
    /// Earliest values are derived from the retained latest start, slack
    /// and cost, since the forward maps are drained during the backward pass.
    pub fn timing(&self, index: EventIndex) -> Option<EventTiming> {
        let latest_start = self.latest_start(index)?;
        let latest_finish = self.latest_finish(index)?;
        let slack = self.slack(index)?;
        let cost = self.state.cost.get(&index).copied()?;
        let earliest_start = latest_start - slack;
        Some(EventTiming {
            earliest_start,
            earliest_finish: earliest_start + cost,
            latest_start,
            latest_finish,
            slack,
        })
    }

    /// Statistics of the last run (`None` before a run)
    pub fn stats(&self) -> Option<&AnalysisStats> {
        self.stats.as_ref()
    }

    /// Current entry counts of the internal maps
    pub fn map_sizes(&self) -> MapSizes {
        self.state.sizes()
    }

    /// Values this run publishes for analyses of other traces
    pub fn boundary_export(&self) -> BoundaryExport {
        self.state.export.clone()
    }

    pub fn summary(&self) -> CriticalPathSummary {
        let trace = self.replayer.trace();
        CriticalPathSummary {
            execution_process_id: trace.map(|t| t.info().execution_process_id),
            events: trace.map_or(0, |t| t.len()),
            length: self.critical_path_length,
            critical_events: self.critical_path.len(),
            critical_indices: self.critical_indices(),
        }
    }
}

impl Default for CriticalPathFinding {
    fn default() -> Self {
        Self::new(None, CpmOptions::default())
    }
}

impl fmt::Debug for CriticalPathFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalPathFinding")
            .field("phase", &self.phase)
            .field("policy", &self.options.policy)
            .field("critical_path_length", &self.critical_path_length)
            .field("critical_events", &self.critical_path.len())
            .finish()
    }
}
