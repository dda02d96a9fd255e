//! Shared trace builders for integration tests

#![allow(dead_code)]

use critpath::{Event, EventIndex, ProcessId, Trace, TraceInfo};

fn next_index(trace: &Trace) -> EventIndex {
    trace.len() as EventIndex
}

/// Ring-exchange workload over `processes` ranks.
///
/// Every round each process computes once; every `exchange_every` rounds
/// each process sends to its right neighbour, then every process receives
/// from its left neighbour. Messages are linked before returning.
pub fn ring_trace(processes: u32, rounds: u32, exchange_every: u32) -> Trace {
    let mut trace = Trace::for_process(0);
    for round in 0..rounds {
        for p in 0..processes {
            let i = next_index(&trace);
            trace.push(Event::compute(i, p, i as f64));
        }
        if exchange_every > 0 && round % exchange_every == 0 && processes > 1 {
            for p in 0..processes {
                let i = next_index(&trace);
                trace.push(Event::send(i, p, i as f64, (p + 1) % processes, 0));
            }
            for p in 0..processes {
                let i = next_index(&trace);
                let left = (p + processes - 1) % processes;
                trace.push(Event::recv(i, p, i as f64, left, 0));
            }
        }
    }
    trace.link_messages();
    trace
}

/// Single-process chain of `len` compute events owned by `ep`
pub fn chain_trace(ep: ProcessId, len: u64) -> Trace {
    let mut trace = Trace::for_process(ep);
    for i in 0..len {
        trace.push(Event::compute(i, ep, i as f64));
    }
    trace
}

/// Uneven pipeline: in every stage process `p` computes `1 + (p + stage) % 3`
/// events, then passes a message to `p + 1`. Messages are linked.
pub fn pipeline_trace(processes: u32, stages: u32) -> Trace {
    let mut trace = Trace::for_process(0);
    for stage in 0..stages {
        for p in 0..processes {
            for _ in 0..1 + (p + stage) % 3 {
                let i = next_index(&trace);
                trace.push(Event::compute(i, p, i as f64));
            }
        }
        for p in 0..processes.saturating_sub(1) {
            let i = next_index(&trace);
            trace.push(Event::send(i, p, i as f64, p + 1, 0));
        }
        for p in 1..processes {
            let i = next_index(&trace);
            trace.push(Event::recv(i, p, i as f64, p - 1, 0));
        }
    }
    trace.link_messages();
    trace
}

/// One trace per execution process, events keep their indices and links
pub fn split_by_process(trace: &Trace) -> Vec<Trace> {
    trace
        .process_ids()
        .into_iter()
        .map(|ep| {
            let info = TraceInfo {
                execution_process_id: ep,
                ..TraceInfo::default()
            };
            Trace::from_events(info, trace.events_of(ep).cloned().collect())
        })
        .collect()
}
