//! DistributedReplayCoordinator - per-rank driver of a distributed replay
//!
//! Each rank owns one coordinator. `distribute_traces` keeps the traces this
//! rank replays (all of them when messaging is disabled), stamps the
//! distribution on them and registers them with the fetcher. Replays,
//! barriers and gathers then operate on the local share only.
//!
//! `analyze_critical_paths` treats every trace as one execution process of
//! a single program. Messages crossing traces are resolved in rounds: each
//! round runs every local analysis against the merged [`Boundary`], checks
//! cross-trace partners through the fetcher, then all-gathers the exports.
//! The rounds stop once the merged boundary no longer changes, at which
//! point every analysis agrees with a single analysis of the merged trace.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::comm::{Communicator, SerialCommunicator, ROOT_RANK};
use super::distributor::{LoadBalance, TraceDistributor};
use super::fetcher::EventDataFetcher;
use crate::cpm::{Boundary, BoundaryExport, CpmOptions, CriticalPathFinding, CriticalPathSummary};
use crate::error::{CritPathError, Result};
use crate::replay::{Direction, TraceReplayer};
use crate::trace::{Event, ProcessMapping, RankId, Trace};

pub struct DistributedReplayCoordinator {
    comm: Arc<dyn Communicator>,
    distributor: TraceDistributor,
    fetcher: EventDataFetcher,
    local_traces: Vec<Arc<Trace>>,
    replayer: TraceReplayer,
}

impl DistributedReplayCoordinator {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self {
            fetcher: EventDataFetcher::new(Arc::clone(&comm)),
            comm,
            distributor: TraceDistributor::new(),
            local_traces: Vec::new(),
            replayer: TraceReplayer::new(),
        }
    }

    /// Single-process coordinator with messaging disabled
    pub fn serial() -> Self {
        Self::new(Arc::new(SerialCommunicator))
    }

    pub fn rank(&self) -> RankId {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn is_root(&self) -> bool {
        self.comm.rank() == ROOT_RANK
    }

    pub fn is_distributed(&self) -> bool {
        self.comm.is_enabled()
    }

    pub fn local_traces(&self) -> &[Arc<Trace>] {
        &self.local_traces
    }

    pub fn fetcher(&self) -> &EventDataFetcher {
        &self.fetcher
    }

    pub fn mapping(&self) -> Option<&Arc<ProcessMapping>> {
        self.distributor.mapping()
    }

    pub fn load_balance(&mut self) -> Result<LoadBalance> {
        self.distributor.load_balance_info()
    }

    /// Split `all_traces` over `num_replay_processes` ranks and keep this rank's share.
    ///
    /// With messaging enabled the replay process count must equal the
    /// communicator size.
    #[instrument(skip(self, all_traces), fields(rank = self.comm.rank(), traces = all_traces.len()))]
    pub fn distribute_traces(
        &mut self,
        all_traces: Vec<Trace>,
        num_execution_processes: u32,
        num_replay_processes: usize,
    ) -> Result<&[Arc<Trace>]> {
        self.distributor.set_execution_processes(num_execution_processes);
        self.distributor.set_replay_processes(num_replay_processes);
        let mapping = self.distributor.compute_distribution()?;

        let distributed = self.comm.is_enabled();
        if distributed && num_replay_processes != self.comm.size() {
            return Err(CritPathError::ReplayProcessMismatch {
                requested: num_replay_processes,
                available: self.comm.size(),
            });
        }

        let rank = self.comm.rank();
        self.local_traces = all_traces
            .into_iter()
            .filter(|t| !distributed || mapping.owner(t.info().execution_process_id) == Some(rank))
            .map(|mut trace| {
                trace.info_mut().total_execution_processes = num_execution_processes;
                trace.assign_replay_processes(&mapping, num_replay_processes);
                Arc::new(trace)
            })
            .collect();
        self.fetcher
            .register_traces(&self.local_traces, Arc::clone(&mapping));

        info!(
            local = self.local_traces.len(),
            execution_processes = num_execution_processes,
            replay_processes = num_replay_processes,
            "Traces distributed"
        );
        Ok(&self.local_traces)
    }

    /// Callback run for every local event replayed in `direction`
    pub fn register_callback<F>(&mut self, direction: Direction, name: impl Into<String>, callback: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.replayer.register(direction, name, callback);
    }

    pub fn unregister_callback(&mut self, direction: Direction, name: &str) -> bool {
        self.replayer.unregister(direction, name)
    }

    fn replay_local(&mut self, direction: Direction) -> usize {
        let mut visited = 0;
        for trace in &self.local_traces {
            self.replayer.set_trace(Arc::clone(trace));
            visited += self.replayer.replay(direction);
        }
        self.replayer.take_trace();
        debug!(rank = self.comm.rank(), ?direction, visited, "Local replay done");
        visited
    }

    /// Replay every local trace front to back. Returns events visited.
    pub fn forward_replay(&mut self) -> usize {
        self.replay_local(Direction::Forward)
    }

    /// Replay every local trace back to front. Returns events visited.
    pub fn backward_replay(&mut self) -> usize {
        self.replay_local(Direction::Backward)
    }

    /// No-op when messaging is disabled
    pub fn barrier(&self) -> Result<()> {
        self.comm.barrier()
    }

    /// Collect `value` from every rank at the root, ordered by rank.
    ///
    /// Returns `Some` at the root and `None` elsewhere.
    pub fn gather<T: Serialize + DeserializeOwned>(&self, value: &T) -> Result<Option<Vec<T>>> {
        let payload = serde_json::to_vec(value)?;
        let Some(parts) = self.comm.gather(payload, ROOT_RANK)? else {
            return Ok(None);
        };
        let values = parts
            .iter()
            .map(|bytes| serde_json::from_slice(bytes))
            .collect::<std::result::Result<Vec<T>, _>>()?;
        Ok(Some(values))
    }

    /// Every rank receives `value` from every rank, ordered by rank
    pub fn all_gather<T: Serialize + DeserializeOwned>(&self, value: &T) -> Result<Vec<T>> {
        let payload = serde_json::to_vec(value)?;
        self.comm
            .all_gather(payload)?
            .iter()
            .map(|bytes| Ok(serde_json::from_slice(bytes)?))
            .collect()
    }

    /// Run the critical-path analysis on every local trace and gather the
    /// summaries at the root, ordered by execution process.
    ///
    /// Collective: every rank must call it. Each summary carries the length
    /// of the whole program and the critical events of its own trace.
    #[instrument(skip(self, options), fields(rank = self.comm.rank()))]
    pub fn analyze_critical_paths(
        &self,
        options: &CpmOptions,
    ) -> Result<Option<Vec<CriticalPathSummary>>> {
        let mut finders: Vec<CriticalPathFinding> = self
            .local_traces
            .iter()
            .map(|trace| CriticalPathFinding::new(Some(Arc::clone(trace)), options.clone()))
            .collect();

        let mut boundary = Arc::new(Boundary::default());
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let exports: Vec<BoundaryExport> = finders
                .iter_mut()
                .map(|finder| {
                    finder.set_boundary(Arc::clone(&boundary));
                    finder.run_with_source(&self.fetcher);
                    finder.boundary_export()
                })
                .collect();

            // Peers may still be resolving partners held here
            self.fetcher.shutdown_peers()?;
            self.fetcher.serve()?;

            let all = self.all_gather(&exports)?;
            let merged = Boundary::from_exports(all.iter().flatten());
            if merged == *boundary {
                break;
            }
            // Each round settles at least one more message hop
            let limit = 2 * merged.len() + 3;
            if rounds >= limit {
                warn!(rounds, links = merged.len(), "Cross-trace values did not settle");
                break;
            }
            boundary = Arc::new(merged);
        }
        debug!(rounds, links = boundary.len(), "Cross-trace values settled");

        let local: Vec<CriticalPathSummary> = finders.iter().map(|f| f.summary()).collect();
        Ok(self.gather(&local)?.map(|per_rank| {
            let mut all: Vec<CriticalPathSummary> = per_rank.into_iter().flatten().collect();
            all.sort_by_key(|s| s.execution_process_id);
            all
        }))
    }
}
