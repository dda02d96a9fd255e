//! EventDataFetcher - on-demand retrieval of events owned by other ranks
//!
//! Lookup order for `(ep, index)`:
//! 1. cache of previously fetched events
//! 2. local traces of this rank
//! 3. request to the owning rank (per the distribution mapping)
//!
//! A rank waiting for a response keeps answering incoming requests, so two
//! ranks fetching from each other at the same time make progress. A rank
//! done fetching calls `shutdown_peers` and then `serve`, which keeps
//! answering until every other rank is done as well. Such a fetch session
//! may be repeated; every rank must take part in each one. Any
//! failure (backend disabled, unknown owner, codec or peer error) is logged
//! and reported as "data unavailable".

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::comm::{Communicator, MessageTag, Packet};
use crate::cpm::EventSource;
use crate::error::Result;
use crate::trace::{Event, EventIndex, ProcessId, ProcessMapping, RankId, Trace};

/// Wire protocol of the fetch streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FetchMessage {
    Request { ep: ProcessId, index: EventIndex },
    Response { event: Option<Event> },
    Shutdown,
}

impl FetchMessage {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Counters of where fetched events came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub cache_hits: u64,
    pub local_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    pub requests_served: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    requests_served: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct EventDataFetcher {
    comm: Arc<dyn Communicator>,
    local: FxHashMap<ProcessId, Arc<Trace>>,
    mapping: Option<Arc<ProcessMapping>>,
    /// Only successful lookups are cached
    cache: DashMap<(ProcessId, EventIndex), Event>,
    counters: Counters,
    /// Shutdown announcements received, over all sessions
    finished_peers: AtomicUsize,
    /// Sessions this rank has closed with `shutdown_peers`
    sessions: AtomicUsize,
    warned_disabled: AtomicBool,
}

impl EventDataFetcher {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self {
            comm,
            local: FxHashMap::default(),
            mapping: None,
            cache: DashMap::new(),
            counters: Counters::default(),
            finished_peers: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
            warned_disabled: AtomicBool::new(false),
        }
    }

    /// Make `traces` answerable locally and route other EPs through `mapping`
    pub fn register_traces(&mut self, traces: &[Arc<Trace>], mapping: Arc<ProcessMapping>) {
        self.local = traces
            .iter()
            .map(|t| (t.info().execution_process_id, Arc::clone(t)))
            .collect();
        self.mapping = Some(mapping);
        self.cache.clear();
    }

    pub fn rank(&self) -> RankId {
        self.comm.rank()
    }

    pub fn is_local(&self, ep: ProcessId) -> bool {
        self.local.contains_key(&ep)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> FetchStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        FetchStats {
            cache_hits: load(&self.counters.cache_hits),
            local_hits: load(&self.counters.local_hits),
            remote_hits: load(&self.counters.remote_hits),
            misses: load(&self.counters.misses),
            requests_served: load(&self.counters.requests_served),
        }
    }

    /// Event `index` of execution process `ep`, wherever it lives
    pub fn fetch(&self, ep: ProcessId, index: EventIndex) -> Option<Event> {
        if let Some(event) = self.cache.get(&(ep, index)) {
            Counters::bump(&self.counters.cache_hits);
            return Some(event.clone());
        }

        let found = if self.is_local(ep) {
            let event = self.lookup_local(ep, index);
            if event.is_some() {
                Counters::bump(&self.counters.local_hits);
            }
            event
        } else {
            let event = self.fetch_remote(ep, index);
            if event.is_some() {
                Counters::bump(&self.counters.remote_hits);
            }
            event
        };

        match found {
            Some(event) => {
                self.cache.insert((ep, index), event.clone());
                Some(event)
            }
            None => {
                Counters::bump(&self.counters.misses);
                None
            }
        }
    }

    fn lookup_local(&self, ep: ProcessId, index: EventIndex) -> Option<Event> {
        self.local.get(&ep)?.get(index).cloned()
    }

    fn fetch_remote(&self, ep: ProcessId, index: EventIndex) -> Option<Event> {
        if !self.comm.is_enabled() {
            if !self.warned_disabled.swap(true, Ordering::Relaxed) {
                warn!(ep, index, "Messaging disabled, remote event data unavailable");
            }
            return None;
        }
        let owner = self.mapping.as_ref()?.owner(ep)?;
        if owner == self.comm.rank() {
            debug!(ep, index, "EP is owned here but its trace is not loaded");
            return None;
        }
        match self.request(owner, ep, index) {
            Ok(event) => event,
            Err(e) => {
                warn!(ep, index, owner, error = %e, "Remote fetch failed");
                None
            }
        }
    }

    fn request(&self, owner: RankId, ep: ProcessId, index: EventIndex) -> Result<Option<Event>> {
        self.comm.send(
            owner,
            MessageTag::FetchRequest,
            FetchMessage::Request { ep, index }.encode()?,
        )?;
        loop {
            let packet = self
                .comm
                .recv(None, &[MessageTag::FetchResponse, MessageTag::FetchRequest])?;
            if packet.tag == MessageTag::FetchRequest {
                self.answer(packet)?;
                continue;
            }
            if packet.source != owner {
                warn!(source = packet.source, owner, "Dropping response from unexpected rank");
                continue;
            }
            return match FetchMessage::decode(&packet.payload)? {
                FetchMessage::Response { event } => Ok(event),
                other => {
                    warn!(?other, "Unexpected message on the response stream");
                    Ok(None)
                }
            };
        }
    }

    /// Handle one packet of the request stream
    fn answer(&self, packet: Packet) -> Result<()> {
        match FetchMessage::decode(&packet.payload)? {
            FetchMessage::Request { ep, index } => {
                let event = self.lookup_local(ep, index);
                Counters::bump(&self.counters.requests_served);
                self.comm.send(
                    packet.source,
                    MessageTag::FetchResponse,
                    FetchMessage::Response { event }.encode()?,
                )?;
            }
            FetchMessage::Shutdown => {
                debug!(from = packet.source, "Peer finished fetching");
                self.finished_peers.fetch_add(1, Ordering::Relaxed);
            }
            FetchMessage::Response { .. } => {
                warn!(from = packet.source, "Response on the request stream ignored");
            }
        }
        Ok(())
    }

    /// Answer requests until every other rank has called
    /// [`EventDataFetcher::shutdown_peers`]. Returns requests answered.
    pub fn serve(&self) -> Result<u64> {
        let before = self.stats().requests_served;
        if !self.comm.is_enabled() {
            return Ok(0);
        }
        while !self.all_peers_finished() {
            let packet = self.comm.recv(None, &[MessageTag::FetchRequest])?;
            self.answer(packet)?;
        }
        Ok(self.stats().requests_served - before)
    }

    /// Answer the requests already queued, without blocking
    pub fn serve_pending(&self) -> Result<u64> {
        let before = self.stats().requests_served;
        while let Some(packet) = self.comm.try_recv(None, &[MessageTag::FetchRequest])? {
            self.answer(packet)?;
        }
        Ok(self.stats().requests_served - before)
    }

    /// Tell every other rank this one will send no more requests
    pub fn shutdown_peers(&self) -> Result<()> {
        if !self.comm.is_enabled() {
            return Ok(());
        }
        self.sessions.fetch_add(1, Ordering::Relaxed);
        let payload = FetchMessage::Shutdown.encode()?;
        let me = self.comm.rank();
        for dest in (0..self.comm.size()).filter(|r| *r != me) {
            self.comm
                .send(dest, MessageTag::FetchRequest, payload.clone())?;
        }
        Ok(())
    }

    /// True once every other rank has called `shutdown_peers` for the
    /// current session
    pub fn all_peers_finished(&self) -> bool {
        let session = self.sessions.load(Ordering::Relaxed).max(1);
        let peers = self.comm.size().saturating_sub(1);
        self.finished_peers.load(Ordering::Relaxed) >= peers * session
    }
}

impl EventSource for EventDataFetcher {
    fn event(&self, process: ProcessId, index: EventIndex) -> Option<Event> {
        self.fetch(process, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::comm::{ChannelCommunicator, SerialCommunicator};
    use crate::distributed::distributor::compute_distribution;
    use std::sync::mpsc as std_mpsc;
    use std::thread;
    use std::time::Duration;

    fn trace_for(ep: ProcessId, events: u64) -> Arc<Trace> {
        let mut trace = Trace::for_process(ep);
        for i in 0..events {
            trace.push(Event::compute(i, ep, i as f64));
        }
        Arc::new(trace)
    }

    #[test]
    fn local_events_are_served_and_cached() {
        let mut fetcher = EventDataFetcher::new(Arc::new(SerialCommunicator));
        let mapping = Arc::new(compute_distribution(1, 1).unwrap());
        fetcher.register_traces(&[trace_for(0, 3)], mapping);

        let event = fetcher.fetch(0, 2).unwrap();
        assert_eq!(event.index, 2);
        assert_eq!(fetcher.cache_len(), 1);
        assert!(fetcher.fetch(0, 2).is_some());

        let stats = fetcher.stats();
        assert_eq!((stats.local_hits, stats.cache_hits), (1, 1));
    }

    #[test]
    fn misses_are_not_cached() {
        let mut fetcher = EventDataFetcher::new(Arc::new(SerialCommunicator));
        let mapping = Arc::new(compute_distribution(2, 1).unwrap());
        fetcher.register_traces(&[trace_for(0, 3)], mapping);

        assert!(fetcher.fetch(0, 99).is_none());
        assert!(fetcher.fetch(7, 0).is_none());
        assert_eq!(fetcher.cache_len(), 0);
        assert_eq!(fetcher.stats().misses, 2);
    }

    #[test]
    fn disabled_backend_reports_remote_data_unavailable() {
        let fetcher = EventDataFetcher::new(Arc::new(SerialCommunicator));
        assert!(fetcher.fetch(3, 0).is_none());
        assert_eq!(fetcher.serve().unwrap(), 0);
        assert!(fetcher.shutdown_peers().is_ok());
    }

    #[test]
    fn remote_fetch_between_two_ranks() {
        let comms: Vec<Arc<dyn Communicator>> = ChannelCommunicator::cluster(2)
            .into_iter()
            .map(|c| Arc::new(c) as Arc<dyn Communicator>)
            .collect();
        let mapping = Arc::new(compute_distribution(2, 2).unwrap());

        let mut owner = EventDataFetcher::new(Arc::clone(&comms[1]));
        owner.register_traces(&[trace_for(1, 4)], Arc::clone(&mapping));
        let mut client = EventDataFetcher::new(Arc::clone(&comms[0]));
        client.register_traces(&[trace_for(0, 4)], mapping);

        let (fetched, missing, served) = thread::scope(|s| {
            let server = s.spawn(|| owner.serve().unwrap());
            let fetched = client.fetch(1, 3);
            let missing = client.fetch(1, 42);
            client.shutdown_peers().unwrap();
            (fetched, missing, server.join().unwrap())
        });

        assert_eq!(fetched.map(|e| (e.process_id, e.index)), Some((1, 3)));
        assert!(missing.is_none());
        assert_eq!(served, 2);
        assert_eq!(client.stats().remote_hits, 1);
        assert!(owner.all_peers_finished());
    }

    #[test]
    fn mutual_fetches_do_not_deadlock() {
        let comms: Vec<Arc<dyn Communicator>> = ChannelCommunicator::cluster(2)
            .into_iter()
            .map(|c| Arc::new(c) as Arc<dyn Communicator>)
            .collect();
        let mapping = Arc::new(compute_distribution(2, 2).unwrap());
        let fetchers: Vec<EventDataFetcher> = (0..2)
            .map(|rank| {
                let mut f = EventDataFetcher::new(Arc::clone(&comms[rank]));
                f.register_traces(&[trace_for(rank as ProcessId, 5)], Arc::clone(&mapping));
                f
            })
            .collect();

        let results: Vec<Vec<EventIndex>> = thread::scope(|s| {
            let handles: Vec<_> = fetchers
                .iter()
                .enumerate()
                .map(|(rank, fetcher)| {
                    s.spawn(move || {
                        let peer = (1 - rank) as ProcessId;
                        let got: Vec<EventIndex> =
                            (0..5).filter_map(|i| fetcher.fetch(peer, i)).map(|e| e.index).collect();
                        // peer may still be waiting on us
                        fetcher.shutdown_peers().unwrap();
                        fetcher.serve().unwrap();
                        got
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results, vec![vec![0, 1, 2, 3, 4], vec![0, 1, 2, 3, 4]]);
    }

    #[test]
    fn fetch_completes_while_serving_on_another_thread() {
        let comms: Vec<Arc<dyn Communicator>> = ChannelCommunicator::cluster(2)
            .into_iter()
            .map(|c| Arc::new(c) as Arc<dyn Communicator>)
            .collect();
        let mapping = Arc::new(compute_distribution(2, 2).unwrap());
        let fetchers: Vec<EventDataFetcher> = (0..2)
            .map(|rank| {
                let mut f = EventDataFetcher::new(Arc::clone(&comms[rank]));
                f.register_traces(&[trace_for(rank as ProcessId, 4)], Arc::clone(&mapping));
                f
            })
            .collect();
        let (client, owner) = (&fetchers[0], &fetchers[1]);

        thread::scope(|s| {
            let owner_server = s.spawn(|| owner.serve().unwrap());
            let client_server = s.spawn(|| client.serve().unwrap());
            thread::sleep(Duration::from_millis(50));

            let (done_tx, done_rx) = std_mpsc::channel();
            s.spawn(move || {
                done_tx.send(client.fetch(1, 2).map(|e| e.index)).unwrap();
            });
            let fetched = done_rx.recv_timeout(Duration::from_secs(5));

            client.shutdown_peers().unwrap();
            owner.shutdown_peers().unwrap();
            assert_eq!(owner_server.join().unwrap(), 1);
            assert_eq!(client_server.join().unwrap(), 0);
            assert_eq!(fetched, Ok(Some(2)));
        });
    }

    #[test]
    fn fetch_sessions_can_be_repeated() {
        let comms: Vec<Arc<dyn Communicator>> = ChannelCommunicator::cluster(3)
            .into_iter()
            .map(|c| Arc::new(c) as Arc<dyn Communicator>)
            .collect();
        let mapping = Arc::new(compute_distribution(3, 3).unwrap());
        let fetchers: Vec<EventDataFetcher> = (0..3)
            .map(|rank| {
                let mut f = EventDataFetcher::new(Arc::clone(&comms[rank]));
                f.register_traces(&[trace_for(rank as ProcessId, 6)], Arc::clone(&mapping));
                f
            })
            .collect();
        let comms = &comms;

        let hits: Vec<u64> = thread::scope(|s| {
            let handles: Vec<_> = fetchers
                .iter()
                .enumerate()
                .map(|(rank, fetcher)| {
                    s.spawn(move || {
                        let peer = ((rank + 1) % 3) as ProcessId;
                        for session in 0..3 {
                            assert!(fetcher.fetch(peer, session).is_some());
                            fetcher.shutdown_peers().unwrap();
                            fetcher.serve().unwrap();
                            comms[rank].barrier().unwrap();
                        }
                        fetcher.stats().remote_hits
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(hits, vec![3, 3, 3]);
    }
}
