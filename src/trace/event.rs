//! Event - a single timestamped record of one execution process
//!
//! A closed sum type: every event carries an [`EventKind`] tag, and only
//! point-to-point events carry a [`P2PFields`] payload. Partner links are
//! weak references by index into the owning trace, never owned pointers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::util::intern;

/// Execution process (rank of the traced application)
pub type ProcessId = u32;
/// Thread within an execution process
pub type ThreadId = u32;
/// Position-independent event identifier, unique within a trace
pub type EventIndex = u64;
/// Replay process (rank of the analysis job)
pub type RankId = usize;

/// Event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Enter,
    Leave,
    Send,
    Recv,
    Collective,
    Barrier,
    Compute,
    Unknown,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        Self::Enter,
        Self::Leave,
        Self::Send,
        Self::Recv,
        Self::Collective,
        Self::Barrier,
        Self::Compute,
        Self::Unknown,
    ];

    /// Stable numeric code used by the columnar layout
    pub fn code(self) -> u8 {
        match self {
            Self::Enter => 0,
            Self::Leave => 1,
            Self::Send => 2,
            Self::Recv => 3,
            Self::Collective => 4,
            Self::Barrier => 5,
            Self::Compute => 6,
            Self::Unknown => 7,
        }
    }

    /// Inverse of [`EventKind::code`]; unknown codes map to `Unknown`
    pub fn from_code(code: u8) -> Self {
        Self::ALL
            .get(code as usize)
            .copied()
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Leave => "leave",
            Self::Send => "send",
            Self::Recv => "recv",
            Self::Collective => "collective",
            Self::Barrier => "barrier",
            Self::Compute => "compute",
            Self::Unknown => "unknown",
        }
    }

    /// Send or Recv
    pub fn is_p2p(self) -> bool {
        matches!(self, Self::Send | Self::Recv)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-to-point payload of Send/Recv events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct P2PFields {
    pub communicator: u32,
    pub tag: i32,
    /// Receiver for a Send, sender for a Recv
    pub partner_process_id: ProcessId,
    /// Index of the matching Recv/Send, once resolved
    #[serde(default)]
    pub partner_index: Option<EventIndex>,
}

/// Single event in an execution trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub index: EventIndex,
    pub name: Arc<str>,
    pub process_id: ProcessId,
    #[serde(default)]
    pub thread_id: ThreadId,
    /// Missing timestamps are read as 0.0
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub replay_process_id: RankId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p2p: Option<P2PFields>,
}

impl Event {
    /// Create an event named after its kind
    pub fn new(kind: EventKind, index: EventIndex, process_id: ProcessId, timestamp: f64) -> Self {
        Self {
            kind,
            index,
            name: intern(kind.as_str()),
            process_id,
            thread_id: 0,
            timestamp: Some(timestamp),
            replay_process_id: 0,
            p2p: None,
        }
    }

    pub fn compute(index: EventIndex, process_id: ProcessId, timestamp: f64) -> Self {
        Self::new(EventKind::Compute, index, process_id, timestamp)
    }

    /// Send from `process_id` to `receiver` on communicator 0
    pub fn send(
        index: EventIndex,
        process_id: ProcessId,
        timestamp: f64,
        receiver: ProcessId,
        tag: i32,
    ) -> Self {
        Self::new(EventKind::Send, index, process_id, timestamp).with_p2p(P2PFields {
            communicator: 0,
            tag,
            partner_process_id: receiver,
            partner_index: None,
        })
    }

    /// Recv on `process_id` from `sender` on communicator 0
    pub fn recv(
        index: EventIndex,
        process_id: ProcessId,
        timestamp: f64,
        sender: ProcessId,
        tag: i32,
    ) -> Self {
        Self::new(EventKind::Recv, index, process_id, timestamp).with_p2p(P2PFields {
            communicator: 0,
            tag,
            partner_process_id: sender,
            partner_index: None,
        })
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = intern(name);
        self
    }

    pub fn with_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_p2p(mut self, p2p: P2PFields) -> Self {
        self.p2p = Some(p2p);
        self
    }

    pub fn with_communicator(mut self, communicator: u32) -> Self {
        if let Some(p2p) = self.p2p.as_mut() {
            p2p.communicator = communicator;
        }
        self
    }

    /// Link to the matching Send/Recv by index (no-op on non-P2P events)
    pub fn with_partner(mut self, partner_index: EventIndex) -> Self {
        if let Some(p2p) = self.p2p.as_mut() {
            p2p.partner_index = Some(partner_index);
        }
        self
    }

    pub fn without_timestamp(mut self) -> Self {
        self.timestamp = None;
        self
    }

    #[inline]
    pub fn timestamp_or_zero(&self) -> f64 {
        self.timestamp.unwrap_or(0.0)
    }

    #[inline]
    pub fn partner_index(&self) -> Option<EventIndex> {
        self.p2p.as_ref().and_then(|p| p.partner_index)
    }

    #[inline]
    pub fn partner_process_id(&self) -> Option<ProcessId> {
        self.p2p.as_ref().map(|p| p.partner_process_id)
    }

    #[inline]
    pub fn is_send(&self) -> bool {
        self.kind == EventKind::Send
    }

    #[inline]
    pub fn is_recv(&self) -> bool {
        self.kind == EventKind::Recv
    }
}
