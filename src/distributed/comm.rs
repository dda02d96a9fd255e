//! Communicator - point-to-point messaging between replay processes
//!
//! Contract:
//! - `send` is fire-and-forget and never blocks
//! - `recv` blocks until a packet matching the (source, tags) filter arrives;
//!   non-matching packets are buffered, so receive order per source is kept
//! - `barrier`, `gather` and `all_gather` are built on top of send/recv and
//!   rooted at rank 0
//!
//! Two backends ship with the crate:
//! - [`SerialCommunicator`]: the "messaging disabled" backend, one rank
//! - [`ChannelCommunicator`]: in-process ranks connected by tokio channels,
//!   each rank driven from its own OS thread

use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::error::{CritPathError, Result};
use crate::trace::RankId;

/// Rank that owns collective results
pub const ROOT_RANK: RankId = 0;

/// Tag distinguishing the message streams sharing one communicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageTag {
    FetchRequest,
    FetchResponse,
    Barrier,
    Gather,
    Broadcast,
}

/// One message in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source: RankId,
    pub tag: MessageTag,
    pub payload: Vec<u8>,
}

impl Packet {
    fn matches(&self, source: Option<RankId>, tags: &[MessageTag]) -> bool {
        source.map_or(true, |s| s == self.source) && tags.contains(&self.tag)
    }
}

/// Messaging backend used by the fetcher and the coordinator
pub trait Communicator: Send + Sync + fmt::Debug {
    fn rank(&self) -> RankId;

    fn size(&self) -> usize;

    /// False for the single-process backend
    fn is_enabled(&self) -> bool;

    fn send(&self, dest: RankId, tag: MessageTag, payload: Vec<u8>) -> Result<()>;

    /// Block until a packet from `source` (any if `None`) with one of `tags` arrives
    fn recv(&self, source: Option<RankId>, tags: &[MessageTag]) -> Result<Packet>;

    /// Non-blocking variant of [`Communicator::recv`]
    fn try_recv(&self, source: Option<RankId>, tags: &[MessageTag]) -> Result<Option<Packet>>;

    /// Every rank waits until all ranks have entered the barrier
    fn barrier(&self) -> Result<()> {
        let size = self.size();
        if size <= 1 {
            return Ok(());
        }
        if self.rank() == ROOT_RANK {
            for source in (0..size).filter(|r| *r != ROOT_RANK) {
                self.recv(Some(source), &[MessageTag::Barrier])?;
            }
            for dest in (0..size).filter(|r| *r != ROOT_RANK) {
                self.send(dest, MessageTag::Barrier, Vec::new())?;
            }
        } else {
            self.send(ROOT_RANK, MessageTag::Barrier, Vec::new())?;
            self.recv(Some(ROOT_RANK), &[MessageTag::Barrier])?;
        }
        Ok(())
    }

    /// Collect one payload per rank at `root`, ordered by rank.
    ///
    /// Returns `Some` at the root and `None` everywhere else.
    fn gather(&self, payload: Vec<u8>, root: RankId) -> Result<Option<Vec<Vec<u8>>>> {
        let size = self.size();
        if root >= size {
            return Err(CritPathError::InvalidRank { rank: root, size });
        }
        if self.rank() != root {
            self.send(root, MessageTag::Gather, payload)?;
            return Ok(None);
        }
        let mut own = Some(payload);
        let mut collected = Vec::with_capacity(size);
        for source in 0..size {
            if source == root {
                collected.push(own.take().unwrap_or_default());
            } else {
                collected.push(self.recv(Some(source), &[MessageTag::Gather])?.payload);
            }
        }
        Ok(Some(collected))
    }

    /// Every rank receives every rank's payload, ordered by rank
    fn all_gather(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let size = self.size();
        if let Some(collected) = self.gather(payload, ROOT_RANK)? {
            for dest in (0..size).filter(|r| *r != ROOT_RANK) {
                for part in &collected {
                    self.send(dest, MessageTag::Broadcast, part.clone())?;
                }
            }
            return Ok(collected);
        }
        (0..size)
            .map(|_| Ok(self.recv(Some(ROOT_RANK), &[MessageTag::Broadcast])?.payload))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════
// Single-process backend
// ═══════════════════════════════════════════════════════════════

/// Messaging disabled: one rank, collectives are local no-ops
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> RankId {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn send(&self, _dest: RankId, _tag: MessageTag, _payload: Vec<u8>) -> Result<()> {
        Err(CritPathError::BackendUnavailable { operation: "send" })
    }

    fn recv(&self, _source: Option<RankId>, _tags: &[MessageTag]) -> Result<Packet> {
        Err(CritPathError::BackendUnavailable { operation: "recv" })
    }

    fn try_recv(&self, _source: Option<RankId>, _tags: &[MessageTag]) -> Result<Option<Packet>> {
        Ok(None)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn gather(&self, payload: Vec<u8>, root: RankId) -> Result<Option<Vec<Vec<u8>>>> {
        if root != 0 {
            return Err(CritPathError::InvalidRank { rank: root, size: 1 });
        }
        Ok(Some(vec![payload]))
    }

    fn all_gather(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        Ok(vec![payload])
    }
}

// ═══════════════════════════════════════════════════════════════
// In-process channel backend
// ═══════════════════════════════════════════════════════════════

/// One rank of an in-process cluster.
///
/// `recv` uses `blocking_recv`, so it must be called from plain threads,
/// never from inside an async runtime. Several threads of one rank may
/// receive at once: one of them drains the channel while the others wait
/// on `arrived` and re-scan the mailbox after every delivery.
pub struct ChannelCommunicator {
    rank: RankId,
    peers: Vec<UnboundedSender<Packet>>,
    inbox: Mutex<UnboundedReceiver<Packet>>,
    mailbox: Mutex<Mailbox>,
    arrived: Condvar,
}

#[derive(Debug, Default)]
struct Mailbox {
    /// Packets received while waiting for a different (source, tag)
    pending: VecDeque<Packet>,
    /// A thread is blocked on the channel on behalf of everyone
    draining: bool,
}

impl Mailbox {
    fn take(&mut self, source: Option<RankId>, tags: &[MessageTag]) -> Option<Packet> {
        let position = self.pending.iter().position(|p| p.matches(source, tags))?;
        self.pending.remove(position)
    }
}

impl ChannelCommunicator {
    /// Build `size` fully connected ranks, ordered by rank
    pub fn cluster(size: usize) -> Vec<Self> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Self {
                rank,
                peers: senders.clone(),
                inbox: Mutex::new(inbox),
                mailbox: Mutex::new(Mailbox::default()),
                arrived: Condvar::new(),
            })
            .collect()
    }

    /// Packets buffered for later receives
    pub fn pending_len(&self) -> usize {
        self.mailbox.lock().pending.len()
    }

    /// Block on the channel with the mailbox released, then reacquire it
    fn drain_one(&self, mailbox: &mut MutexGuard<'_, Mailbox>) -> Option<Packet> {
        mailbox.draining = true;
        let packet = MutexGuard::unlocked(mailbox, || self.inbox.lock().blocking_recv());
        mailbox.draining = false;
        packet
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> RankId {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn send(&self, dest: RankId, tag: MessageTag, payload: Vec<u8>) -> Result<()> {
        let peer = self.peers.get(dest).ok_or(CritPathError::InvalidRank {
            rank: dest,
            size: self.peers.len(),
        })?;
        trace!(from = self.rank, to = dest, ?tag, bytes = payload.len(), "send");
        peer.send(Packet {
            source: self.rank,
            tag,
            payload,
        })
        .map_err(|_| CritPathError::PeerDisconnected { rank: dest })
    }

    fn recv(&self, source: Option<RankId>, tags: &[MessageTag]) -> Result<Packet> {
        let mut mailbox = self.mailbox.lock();
        loop {
            if let Some(packet) = mailbox.take(source, tags) {
                return Ok(packet);
            }
            if mailbox.draining {
                self.arrived.wait(&mut mailbox);
                continue;
            }
            let received = self.drain_one(&mut mailbox);
            // Either a waiter's packet landed in the mailbox or the drainer
            // role is free again: both need the other threads to look
            self.arrived.notify_all();
            match received {
                Some(packet) if packet.matches(source, tags) => return Ok(packet),
                Some(packet) => mailbox.pending.push_back(packet),
                None => return Err(CritPathError::PeerDisconnected { rank: self.rank }),
            }
        }
    }

    fn try_recv(&self, source: Option<RankId>, tags: &[MessageTag]) -> Result<Option<Packet>> {
        let mut mailbox = self.mailbox.lock();
        if let Some(packet) = mailbox.take(source, tags) {
            return Ok(Some(packet));
        }
        if mailbox.draining {
            // The draining thread files anything that arrives
            return Ok(None);
        }
        let mut inbox = self.inbox.lock();
        let mut buffered = false;
        let result = loop {
            match inbox.try_recv() {
                Ok(packet) if packet.matches(source, tags) => break Ok(Some(packet)),
                Ok(packet) => {
                    mailbox.pending.push_back(packet);
                    buffered = true;
                }
                Err(TryRecvError::Empty) => break Ok(None),
                Err(TryRecvError::Disconnected) => {
                    break Err(CritPathError::PeerDisconnected { rank: self.rank })
                }
            }
        };
        if buffered {
            self.arrived.notify_all();
        }
        result
    }
}

impl fmt::Debug for ChannelCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.peers.len())
            .field("pending", &self.pending_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn serial_backend_is_disabled() {
        let comm = SerialCommunicator;
        assert!(!comm.is_enabled());
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        assert!(comm.barrier().is_ok());
        assert!(matches!(
            comm.send(0, MessageTag::FetchRequest, vec![]),
            Err(CritPathError::BackendUnavailable { operation: "send" })
        ));
        assert_eq!(comm.try_recv(None, &[MessageTag::Gather]).unwrap(), None);
        assert_eq!(comm.gather(vec![7], 0).unwrap(), Some(vec![vec![7]]));
        assert!(comm.gather(vec![7], 1).is_err());
    }

    #[test]
    fn send_to_self_round_trips() {
        let comms = ChannelCommunicator::cluster(1);
        let comm = &comms[0];
        comm.send(0, MessageTag::FetchRequest, b"hi".to_vec()).unwrap();
        let packet = comm.recv(None, &[MessageTag::FetchRequest]).unwrap();
        assert_eq!(packet.source, 0);
        assert_eq!(packet.payload, b"hi".to_vec());
    }

    #[test]
    fn non_matching_packets_are_buffered_in_order() {
        let comms = ChannelCommunicator::cluster(2);
        comms[1].send(0, MessageTag::Gather, vec![1]).unwrap();
        comms[1].send(0, MessageTag::Gather, vec![2]).unwrap();
        comms[1].send(0, MessageTag::FetchResponse, vec![3]).unwrap();

        let response = comms[0].recv(Some(1), &[MessageTag::FetchResponse]).unwrap();
        assert_eq!(response.payload, vec![3]);
        assert_eq!(comms[0].pending_len(), 2);

        let first = comms[0].try_recv(None, &[MessageTag::Gather]).unwrap().unwrap();
        let second = comms[0].try_recv(None, &[MessageTag::Gather]).unwrap().unwrap();
        assert_eq!((first.payload, second.payload), (vec![1], vec![2]));
        assert_eq!(comms[0].try_recv(None, &[MessageTag::Gather]).unwrap(), None);
    }

    #[test]
    fn invalid_destination_is_rejected() {
        let comms = ChannelCommunicator::cluster(2);
        assert!(matches!(
            comms[0].send(5, MessageTag::Barrier, vec![]),
            Err(CritPathError::InvalidRank { rank: 5, size: 2 })
        ));
    }

    #[test]
    fn gather_orders_payloads_by_rank() {
        let comms = ChannelCommunicator::cluster(4);
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| s.spawn(move || comm.gather(vec![comm.rank() as u8 * 10], ROOT_RANK)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
        });

        assert_eq!(results[0], Some(vec![vec![0], vec![10], vec![20], vec![30]]));
        assert!(results[1..].iter().all(Option::is_none));
    }

    #[test]
    fn repeated_barriers_complete() {
        let comms = ChannelCommunicator::cluster(3);
        thread::scope(|s| {
            for comm in &comms {
                s.spawn(move || {
                    for _ in 0..5 {
                        comm.barrier().unwrap();
                    }
                });
            }
        });
        assert!(comms.iter().all(|c| c.pending_len() == 0));
    }

    #[test]
    fn second_receiver_on_same_rank_gets_packet_drained_by_first() {
        let comms = ChannelCommunicator::cluster(2);
        let (rank0, rank1) = (&comms[0], &comms[1]);

        thread::scope(|s| {
            // Blocks on the channel waiting for a request
            let server = s.spawn(|| rank0.recv(None, &[MessageTag::FetchRequest]).unwrap());
            thread::sleep(Duration::from_millis(50));

            let (done_tx, done_rx) = std_mpsc::channel();
            s.spawn(move || {
                let packet = rank0.recv(Some(1), &[MessageTag::FetchResponse]).unwrap();
                done_tx.send(packet.payload).unwrap();
            });
            thread::sleep(Duration::from_millis(50));

            rank1.send(0, MessageTag::FetchResponse, vec![9]).unwrap();
            let delivered = done_rx.recv_timeout(Duration::from_secs(5));

            // Release the first receiver either way so the scope can end
            rank1.send(0, MessageTag::FetchRequest, vec![1]).unwrap();
            assert_eq!(server.join().unwrap().payload, vec![1]);
            assert_eq!(delivered, Ok(vec![9]));
        });
        assert_eq!(comms[0].pending_len(), 0);
    }

    #[test]
    fn all_gather_delivers_every_payload_everywhere() {
        let comms = ChannelCommunicator::cluster(3);
        let results: Vec<Vec<Vec<u8>>> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| s.spawn(move || comm.all_gather(vec![comm.rank() as u8]).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let expected = vec![vec![0], vec![1], vec![2]];
        assert!(results.iter().all(|r| *r == expected));
        assert_eq!(SerialCommunicator.all_gather(vec![4]).unwrap(), vec![vec![4]]);
    }
}
