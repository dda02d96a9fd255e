//! Trace - append-only, insertion-ordered event arena of one execution process
//!
//! Replay order is insertion order. Events are assumed to be
//! timestamp-non-decreasing but this is never enforced or re-sorted.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::event::{Event, EventIndex, EventKind, ProcessId, RankId, ThreadId};
use super::mapping::ProcessMapping;

/// Metadata attached to a trace by the reader and the distributor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceInfo {
    pub execution_process_id: ProcessId,
    #[serde(default)]
    pub thread_id: ThreadId,
    #[serde(default)]
    pub total_execution_processes: u32,
    #[serde(default)]
    pub total_replay_processes: usize,
    #[serde(default)]
    pub ep_to_rp_mapping: Option<Arc<ProcessMapping>>,
}

/// Ordered sequence of events plus its [`TraceInfo`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    info: TraceInfo,
    events: Vec<Event>,
}

/// (sender, receiver, communicator, tag): MPI non-overtaking channel
type ChannelKey = (ProcessId, ProcessId, u32, i32);

impl Trace {
    pub fn new(info: TraceInfo) -> Self {
        Self {
            info,
            events: Vec::new(),
        }
    }

    /// Empty trace for execution process `ep`
    pub fn for_process(ep: ProcessId) -> Self {
        Self::new(TraceInfo {
            execution_process_id: ep,
            ..TraceInfo::default()
        })
    }

    /// Build a trace from events, keeping their order
    pub fn from_events(info: TraceInfo, events: Vec<Event>) -> Self {
        Self { info, events }
    }

    /// Append an event (insertion order is replay order)
    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    #[inline]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn info(&self) -> &TraceInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut TraceInfo {
        &mut self.info
    }

    /// Look up an event by its index (linear scan)
    pub fn get(&self, index: EventIndex) -> Option<&Event> {
        self.events.iter().find(|e| e.index == index)
    }

    /// Events of one execution process, in insertion order
    pub fn events_of(&self, process_id: ProcessId) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter(move |e| e.process_id == process_id)
    }

    /// Distinct execution processes appearing in this trace
    pub fn process_ids(&self) -> BTreeSet<ProcessId> {
        self.events.iter().map(|e| e.process_id).collect()
    }

    /// Record the distribution on this trace and stamp every event with its owner
    pub fn assign_replay_processes(&mut self, mapping: &Arc<ProcessMapping>, total: usize) {
        self.info.total_replay_processes = total;
        self.info.ep_to_rp_mapping = Some(Arc::clone(mapping));
        for event in &mut self.events {
            let owner: Option<RankId> = mapping.owner(event.process_id);
            event.replay_process_id = owner.unwrap_or_default();
        }
    }

    /// Pair unlinked Sends and Recvs, returning the number of new pairs.
    ///
    /// Matching follows MPI non-overtaking order: FIFO per
    /// (sender, receiver, communicator, tag). Receives may precede their send
    /// in insertion order. Leftovers stay unmatched.
    pub fn link_messages(&mut self) -> usize {
        let mut pending_sends: FxHashMap<ChannelKey, VecDeque<usize>> = FxHashMap::default();
        let mut pending_recvs: FxHashMap<ChannelKey, VecDeque<usize>> = FxHashMap::default();
        let mut pairs: Vec<(usize, usize)> = Vec::new();

        for (pos, event) in self.events.iter().enumerate() {
            let Some(p2p) = event.p2p.as_ref() else {
                continue;
            };
            if p2p.partner_index.is_some() {
                continue;
            }

            match event.kind {
                EventKind::Send => {
                    let key = (event.process_id, p2p.partner_process_id, p2p.communicator, p2p.tag);
                    match pending_recvs.get_mut(&key).and_then(VecDeque::pop_front) {
                        Some(recv_pos) => pairs.push((pos, recv_pos)),
                        None => pending_sends.entry(key).or_default().push_back(pos),
                    }
                }
                EventKind::Recv => {
                    let key = (p2p.partner_process_id, event.process_id, p2p.communicator, p2p.tag);
                    match pending_sends.get_mut(&key).and_then(VecDeque::pop_front) {
                        Some(send_pos) => pairs.push((send_pos, pos)),
                        None => pending_recvs.entry(key).or_default().push_back(pos),
                    }
                }
                _ => {}
            }
        }

        for &(send_pos, recv_pos) in &pairs {
            let send_index = self.events[send_pos].index;
            let recv_index = self.events[recv_pos].index;
            if let Some(p2p) = self.events[send_pos].p2p.as_mut() {
                p2p.partner_index = Some(recv_index);
            }
            if let Some(p2p) = self.events[recv_pos].p2p.as_mut() {
                p2p.partner_index = Some(send_index);
            }
        }

        let unmatched: usize = pending_sends
            .values()
            .chain(pending_recvs.values())
            .map(VecDeque::len)
            .sum();
        debug!(
            ep = self.info.execution_process_id,
            matched = pairs.len(),
            unmatched,
            "Linked point-to-point messages"
        );

        pairs.len()
    }

    /// Rough in-memory footprint of the event arena
    pub fn estimated_bytes(&self) -> usize {
        let p2p = self.events.iter().filter(|e| e.p2p.is_some()).count();
        std::mem::size_of::<Self>()
            + self.events.capacity() * std::mem::size_of::<Event>()
            + p2p * std::mem::size_of::<super::event::P2PFields>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p2p_trace() -> Trace {
        let mut trace = Trace::for_process(0);
        trace.push(Event::compute(0, 0, 0.0));
        trace.push(Event::recv(1, 1, 0.05, 0, 7)); // recv before its send
        trace.push(Event::send(2, 0, 0.1, 1, 7));
        trace.push(Event::send(3, 0, 0.2, 1, 7));
        trace.push(Event::recv(4, 1, 0.3, 0, 7));
        trace.push(Event::send(5, 0, 0.4, 1, 99)); // no receiver
        trace
    }

    #[test]
    fn push_preserves_insertion_order() {
        let mut trace = Trace::for_process(0);
        trace.push(Event::compute(10, 0, 5.0));
        trace.push(Event::compute(11, 0, 1.0));
        let indices: Vec<_> = trace.events().iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![10, 11]);
    }

    #[test]
    fn get_finds_by_index() {
        let trace = p2p_trace();
        assert_eq!(trace.get(3).map(|e| e.kind), Some(EventKind::Send));
        assert!(trace.get(42).is_none());
    }

    #[test]
    fn link_messages_pairs_fifo_per_channel() {
        let mut trace = p2p_trace();
        assert_eq!(trace.link_messages(), 2);

        assert_eq!(trace.get(2).unwrap().partner_index(), Some(1));
        assert_eq!(trace.get(1).unwrap().partner_index(), Some(2));
        assert_eq!(trace.get(3).unwrap().partner_index(), Some(4));
        assert_eq!(trace.get(4).unwrap().partner_index(), Some(3));
        assert_eq!(trace.get(5).unwrap().partner_index(), None);
    }

    #[test]
    fn link_messages_is_idempotent() {
        let mut trace = p2p_trace();
        trace.link_messages();
        let linked = trace.clone();
        assert_eq!(trace.link_messages(), 0);
        assert_eq!(trace, linked);
    }

    #[test]
    fn link_messages_respects_communicator() {
        let mut trace = Trace::for_process(0);
        trace.push(Event::send(0, 0, 0.0, 1, 1).with_communicator(1));
        trace.push(Event::recv(1, 1, 0.1, 0, 1).with_communicator(2));
        assert_eq!(trace.link_messages(), 0);
    }

    #[test]
    fn assign_replay_processes_stamps_events() {
        let mut trace = p2p_trace();
        let mapping: Arc<ProcessMapping> = Arc::new([(0, 0), (1, 1)].into_iter().collect());
        trace.assign_replay_processes(&mapping, 2);

        assert_eq!(trace.info().total_replay_processes, 2);
        assert!(trace.events_of(1).all(|e| e.replay_process_id == 1));
        assert!(trace.events_of(0).all(|e| e.replay_process_id == 0));
    }

    #[test]
    fn process_ids_are_distinct_and_sorted() {
        let trace = p2p_trace();
        assert_eq!(trace.process_ids().into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }
}
