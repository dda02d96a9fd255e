//! Structure-of-arrays view of a trace for batch processing
//!
//! Column `i` of every array describes event `i` in insertion order.
//! Sentinels: missing timestamps are 0.0, absent partners are -1.

use serde::Serialize;

use crate::trace::{EventKind, Trace};

/// Value stored for an absent partner process or unresolved partner event
pub const NO_PARTNER: i64 = -1;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnarTrace {
    pub event_count: usize,
    /// [`EventKind::code`] of each event
    pub kinds: Vec<u8>,
    pub indices: Vec<u64>,
    pub process_ids: Vec<u32>,
    pub thread_ids: Vec<u32>,
    pub timestamps: Vec<f64>,
    pub partner_process_ids: Vec<i64>,
    pub partner_indices: Vec<i64>,
}

/// Convert `trace` to columns, keeping insertion order
pub fn to_columnar(trace: &Trace) -> ColumnarTrace {
    let n = trace.len();
    let mut columns = ColumnarTrace {
        event_count: n,
        kinds: Vec::with_capacity(n),
        indices: Vec::with_capacity(n),
        process_ids: Vec::with_capacity(n),
        thread_ids: Vec::with_capacity(n),
        timestamps: Vec::with_capacity(n),
        partner_process_ids: Vec::with_capacity(n),
        partner_indices: Vec::with_capacity(n),
    };
    for event in trace.events() {
        columns.kinds.push(event.kind.code());
        columns.indices.push(event.index);
        columns.process_ids.push(event.process_id);
        columns.thread_ids.push(event.thread_id);
        columns.timestamps.push(event.timestamp_or_zero());
        columns
            .partner_process_ids
            .push(event.partner_process_id().map_or(NO_PARTNER, i64::from));
        columns.partner_indices.push(
            event
                .partner_index()
                .and_then(|i| i64::try_from(i).ok())
                .unwrap_or(NO_PARTNER),
        );
    }
    columns
}

impl ColumnarTrace {
    pub fn is_empty(&self) -> bool {
        self.event_count == 0
    }

    pub fn kind(&self, column: usize) -> Option<EventKind> {
        self.kinds.get(column).map(|c| EventKind::from_code(*c))
    }

    /// Same columns in reverse order, for backward processing
    pub fn reversed(&self) -> Self {
        fn rev<T: Copy>(v: &[T]) -> Vec<T> {
            v.iter().rev().copied().collect()
        }
        Self {
            event_count: self.event_count,
            kinds: rev(&self.kinds),
            indices: rev(&self.indices),
            process_ids: rev(&self.process_ids),
            thread_ids: rev(&self.thread_ids),
            timestamps: rev(&self.timestamps),
            partner_process_ids: rev(&self.partner_process_ids),
            partner_indices: rev(&self.partner_indices),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Event;
    use pretty_assertions::assert_eq;

    fn sample() -> Trace {
        let mut trace = Trace::for_process(0);
        trace.push(Event::compute(0, 0, 1.0));
        trace.push(Event::send(1, 0, 2.0, 1, 7).with_partner(5));
        trace.push(Event::recv(2, 0, 3.0, 1, 7));
        trace.push(Event::compute(3, 0, 4.0).without_timestamp().with_thread(2));
        trace
    }

    #[test]
    fn columns_follow_insertion_order() {
        let columns = to_columnar(&sample());
        assert_eq!(columns.event_count, 4);
        assert_eq!(columns.indices, vec![0, 1, 2, 3]);
        assert_eq!(columns.kind(1), Some(EventKind::Send));
        assert_eq!(columns.thread_ids, vec![0, 0, 0, 2]);
    }

    #[test]
    fn sentinels_for_missing_data() {
        let columns = to_columnar(&sample());
        assert_eq!(columns.timestamps, vec![1.0, 2.0, 3.0, 0.0]);
        assert_eq!(columns.partner_process_ids, vec![-1, 1, 1, -1]);
        assert_eq!(columns.partner_indices, vec![-1, 5, -1, -1]);
    }

    #[test]
    fn reversed_flips_every_column() {
        let columns = to_columnar(&sample());
        let reversed = columns.reversed();
        assert_eq!(reversed.indices, vec![3, 2, 1, 0]);
        assert_eq!(reversed.partner_indices, vec![-1, -1, 5, -1]);
        assert_eq!(reversed.reversed(), columns);
    }

    #[test]
    fn empty_trace_gives_empty_columns() {
        let columns = to_columnar(&Trace::for_process(3));
        assert!(columns.is_empty());
        assert!(columns.kinds.is_empty());
    }
}
