//! ProcessMapping - execution process → replay process assignment
//!
//! Computed once by the distributor and immutable afterwards. Shared
//! read-only (behind `Arc`) by every component that needs to know which
//! replay process owns an event.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::event::{ProcessId, RankId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessMapping(BTreeMap<ProcessId, RankId>);

impl ProcessMapping {
    /// Replay process owning `ep`, if assigned
    #[inline]
    pub fn owner(&self, ep: ProcessId) -> Option<RankId> {
        self.0.get(&ep).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// (ep, rp) pairs in ascending EP order
    pub fn iter(&self) -> impl Iterator<Item = (ProcessId, RankId)> + '_ {
        self.0.iter().map(|(ep, rp)| (*ep, *rp))
    }

    /// Execution processes assigned to `rank`, ascending
    pub fn processes_of(&self, rank: RankId) -> Vec<ProcessId> {
        self.iter()
            .filter(|(_, rp)| *rp == rank)
            .map(|(ep, _)| ep)
            .collect()
    }
}

impl FromIterator<(ProcessId, RankId)> for ProcessMapping {
    fn from_iter<I: IntoIterator<Item = (ProcessId, RankId)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
