//! Boundary - CPM values of message partners living in other traces
//!
//! When execution processes are analysed one trace each, a Send and its
//! Recv sit in different analyses. Each analysis exports:
//! - the earliest finish of its Sends whose receiver is remote
//! - the latest start of its Recvs whose sender is remote
//! - its largest earliest finish
//!
//! Merging every export gives the [`Boundary`] all analyses run against in
//! the next round. Events are identified by `(process, index)`; an edge is
//! only honoured when the Send's index precedes the Recv's, which keeps the
//! cross-trace graph acyclic.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::trace::{Event, EventIndex, ProcessId};

/// Globally unique event identity across per-process traces
pub type EventKey = (ProcessId, EventIndex);

/// Source of events held outside the analysed trace
pub trait EventSource {
    fn event(&self, process: ProcessId, index: EventIndex) -> Option<Event>;
}

/// One exported value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryValue {
    pub process_id: ProcessId,
    pub index: EventIndex,
    pub value: f64,
}

/// Values one analysis publishes for partners outside its trace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryExport {
    pub send_finish: Vec<BoundaryValue>,
    pub recv_latest_start: Vec<BoundaryValue>,
    pub max_finish: f64,
}

/// Merged exports of every analysis
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Boundary {
    send_finish: FxHashMap<EventKey, f64>,
    recv_latest_start: FxHashMap<EventKey, f64>,
    path_length: Option<f64>,
}

impl Boundary {
    pub fn from_exports<'a>(exports: impl IntoIterator<Item = &'a BoundaryExport>) -> Self {
        let mut boundary = Self::default();
        for export in exports {
            for v in &export.send_finish {
                boundary.send_finish.insert((v.process_id, v.index), v.value);
            }
            for v in &export.recv_latest_start {
                boundary.recv_latest_start.insert((v.process_id, v.index), v.value);
            }
            let length = boundary.path_length.map_or(export.max_finish, |l| l.max(export.max_finish));
            boundary.path_length = Some(length);
        }
        boundary
    }

    /// Earliest finish of the Send `key`
    pub fn send_finish(&self, key: EventKey) -> Option<f64> {
        self.send_finish.get(&key).copied()
    }

    /// Latest start of the Recv `key`
    pub fn recv_latest_start(&self, key: EventKey) -> Option<f64> {
        self.recv_latest_start.get(&key).copied()
    }

    /// Largest earliest finish over every analysis
    pub fn path_length(&self) -> Option<f64> {
        self.path_length
    }

    /// Number of cross-trace values
    pub fn len(&self) -> usize {
        self.send_finish.len() + self.recv_latest_start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.path_length.is_none()
    }
}
