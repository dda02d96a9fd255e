//! TraceDistributor - assigns execution processes to replay processes
//!
//! Round-robin: execution process `ep` is replayed by rank `ep % num_rp`.
//! With 10 execution processes over 3 replay processes the load is
//! `[4, 3, 3]`; counts never differ by more than one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CritPathError, Result};
use crate::trace::{ProcessId, ProcessMapping, RankId};

/// Round-robin mapping of `num_execution_processes` over `num_replay_processes`
pub fn compute_distribution(
    num_execution_processes: u32,
    num_replay_processes: usize,
) -> Result<ProcessMapping> {
    if num_replay_processes == 0 {
        return Err(CritPathError::InvalidReplayProcessCount {
            count: num_replay_processes,
        });
    }
    Ok((0..num_execution_processes)
        .map(|ep| (ep, ep as usize % num_replay_processes))
        .collect())
}

/// Number of execution processes assigned to each replay process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalance {
    /// Indexed by rank
    pub counts: Vec<usize>,
}

impl LoadBalance {
    /// Load counts of a mapping over `num_replay_processes` ranks
    pub fn from_mapping(mapping: &ProcessMapping, num_replay_processes: usize) -> Self {
        let mut counts = vec![0; num_replay_processes];
        for (_, rank) in mapping.iter() {
            if let Some(slot) = counts.get_mut(rank) {
                *slot += 1;
            }
        }
        Self { counts }
    }

    pub fn get(&self, rank: RankId) -> usize {
        self.counts.get(rank).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Difference between the busiest and the idlest replay process
    pub fn imbalance(&self) -> usize {
        let max = self.counts.iter().max().copied().unwrap_or(0);
        let min = self.counts.iter().min().copied().unwrap_or(0);
        max - min
    }
}

/// Stateful wrapper that validates parameters and keeps the last mapping
#[derive(Debug, Clone, Default)]
pub struct TraceDistributor {
    num_execution_processes: Option<u32>,
    num_replay_processes: Option<usize>,
    mapping: Option<Arc<ProcessMapping>>,
}

impl TraceDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counts(num_execution_processes: u32, num_replay_processes: usize) -> Self {
        Self {
            num_execution_processes: Some(num_execution_processes),
            num_replay_processes: Some(num_replay_processes),
            mapping: None,
        }
    }

    pub fn set_execution_processes(&mut self, count: u32) {
        if self.num_execution_processes != Some(count) {
            self.num_execution_processes = Some(count);
            self.mapping = None;
        }
    }

    pub fn set_replay_processes(&mut self, count: usize) {
        if self.num_replay_processes != Some(count) {
            self.num_replay_processes = Some(count);
            self.mapping = None;
        }
    }

    pub fn num_execution_processes(&self) -> Option<u32> {
        self.num_execution_processes
    }

    pub fn num_replay_processes(&self) -> Option<usize> {
        self.num_replay_processes
    }

    /// Last computed mapping, if the counts have not changed since
    pub fn mapping(&self) -> Option<&Arc<ProcessMapping>> {
        self.mapping.as_ref()
    }

    fn counts(&self) -> Result<(u32, usize)> {
        let eps = self
            .num_execution_processes
            .ok_or(CritPathError::MissingDistributionParameter {
                parameter: "num_execution_processes",
            })?;
        let rps = self
            .num_replay_processes
            .ok_or(CritPathError::MissingDistributionParameter {
                parameter: "num_replay_processes",
            })?;
        Ok((eps, rps))
    }

    /// Compute (or reuse) the mapping for the current counts
    pub fn compute_distribution(&mut self) -> Result<Arc<ProcessMapping>> {
        if let Some(mapping) = &self.mapping {
            return Ok(Arc::clone(mapping));
        }
        let (eps, rps) = self.counts()?;
        let mapping = Arc::new(compute_distribution(eps, rps)?);
        debug!(
            execution_processes = eps,
            replay_processes = rps,
            "Computed round-robin distribution"
        );
        self.mapping = Some(Arc::clone(&mapping));
        Ok(mapping)
    }

    /// Per-rank load of the current counts
    pub fn load_balance_info(&mut self) -> Result<LoadBalance> {
        let mapping = self.compute_distribution()?;
        let (_, rps) = self.counts()?;
        Ok(LoadBalance::from_mapping(&mapping, rps))
    }

    /// Execution processes replayed by `rank`
    pub fn processes_of(&mut self, rank: RankId) -> Result<Vec<ProcessId>> {
        Ok(self.compute_distribution()?.processes_of(rank))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_ten_over_three() {
        let mapping = compute_distribution(10, 3).unwrap();
        assert_eq!(mapping.len(), 10);
        assert_eq!(mapping.owner(0), Some(0));
        assert_eq!(mapping.owner(4), Some(1));
        assert_eq!(mapping.owner(9), Some(0));

        let balance = LoadBalance::from_mapping(&mapping, 3);
        assert_eq!(balance.counts, vec![4, 3, 3]);
        assert_eq!(balance.imbalance(), 1);
        assert_eq!(balance.total(), 10);
    }

    #[test]
    fn more_replay_than_execution_processes_leaves_idle_ranks() {
        let balance = TraceDistributor::with_counts(2, 4).load_balance_info().unwrap();
        assert_eq!(balance.counts, vec![1, 1, 0, 0]);
    }

    #[test]
    fn zero_execution_processes_yield_empty_mapping() {
        let mapping = compute_distribution(0, 4).unwrap();
        assert!(mapping.is_empty());
    }

    #[test]
    fn zero_replay_processes_rejected() {
        let err = compute_distribution(4, 0).unwrap_err();
        assert!(matches!(
            err,
            CritPathError::InvalidReplayProcessCount { count: 0 }
        ));
        assert!(err.is_configuration());
    }

    #[test]
    fn unset_counts_are_reported() {
        let mut distributor = TraceDistributor::new();
        let err = distributor.compute_distribution().unwrap_err();
        assert!(matches!(
            err,
            CritPathError::MissingDistributionParameter {
                parameter: "num_execution_processes"
            }
        ));

        distributor.set_execution_processes(4);
        let err = distributor.compute_distribution().unwrap_err();
        assert!(matches!(
            err,
            CritPathError::MissingDistributionParameter {
                parameter: "num_replay_processes"
            }
        ));
    }

    #[test]
    fn mapping_is_reused_until_counts_change() {
        let mut distributor = TraceDistributor::with_counts(6, 2);
        let first = distributor.compute_distribution().unwrap();
        let second = distributor.compute_distribution().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        distributor.set_replay_processes(3);
        assert!(distributor.mapping().is_none());
        let third = distributor.compute_distribution().unwrap();
        assert_eq!(third.owner(4), Some(1));
        assert_eq!(distributor.processes_of(0).unwrap(), vec![0, 3]);
    }
}
