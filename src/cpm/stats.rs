//! Timing and memory instrumentation for CPM runs
//!
//! Diagnostic only: nothing here feeds back into the algorithm.
//! Byte figures are estimates of the analysis maps, plus the process
//! high-water mark where the platform exposes it.

use serde::Serialize;

/// Pass a sample was taken in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Forward,
    Backward,
}

/// Entry counts of every internal map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MapSizes {
    pub cost: usize,
    pub predecessors: usize,
    pub successors: usize,
    pub earliest_start: usize,
    pub earliest_finish: usize,
    pub latest_start: usize,
    pub latest_finish: usize,
    pub slack: usize,
}

impl MapSizes {
    pub fn total(&self) -> usize {
        self.cost
            + self.predecessors
            + self.successors
            + self.earliest_start
            + self.earliest_finish
            + self.latest_start
            + self.latest_finish
            + self.slack
    }
}

/// One point of the map-size timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapSizeSample {
    pub phase: Phase,
    /// Events processed so far in this pass
    pub position: usize,
    pub sizes: MapSizes,
    pub estimated_bytes: usize,
}

/// Statistics of the last run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisStats {
    pub trace_bytes: usize,
    pub forward_start_bytes: usize,
    pub forward_end_bytes: usize,
    pub backward_start_bytes: usize,
    pub backward_end_bytes: usize,
    pub peak_bytes: usize,
    /// Process high-water mark (VmHWM) when memory tracking is on
    pub peak_rss_bytes: Option<u64>,
    pub forward_time_s: f64,
    pub backward_time_s: f64,
    pub total_time_s: f64,
    /// Events whose earliest values were kept after the forward pass
    pub stored_events: usize,
    /// Earliest values recomputed on demand (counted per recomputed event)
    pub recomputed_events: usize,
    pub checkpoint_count: usize,
    /// Most events touched by a single recomputation
    pub max_recompute_span: usize,
    pub timeline: Vec<MapSizeSample>,
}

/// Samples map sizes at a fixed event interval
#[derive(Debug, Clone)]
pub(crate) struct MemoryTracker {
    enabled: bool,
    sampling_interval: usize,
    peak_bytes: usize,
    timeline: Vec<MapSizeSample>,
}

impl MemoryTracker {
    pub(crate) fn new(enabled: bool, sampling_interval: usize) -> Self {
        Self {
            enabled,
            sampling_interval: sampling_interval.max(1),
            peak_bytes: 0,
            timeline: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn enabled(&self) -> bool {
        self.enabled
    }

    /// Record a sample if `position` falls on the sampling interval
    #[inline]
    pub(crate) fn tick(&mut self, phase: Phase, position: usize, sizes: MapSizes, bytes: usize) {
        if self.enabled && position % self.sampling_interval == 0 {
            self.record(phase, position, sizes, bytes);
        }
    }

    /// Record a sample unconditionally (pass boundaries); returns `bytes`
    pub(crate) fn record(&mut self, phase: Phase, position: usize, sizes: MapSizes, bytes: usize) -> usize {
        if !self.enabled {
            return 0;
        }
        self.peak_bytes = self.peak_bytes.max(bytes);
        self.timeline.push(MapSizeSample {
            phase,
            position,
            sizes,
            estimated_bytes: bytes,
        });
        bytes
    }

    pub(crate) fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }

    pub(crate) fn take_timeline(&mut self) -> Vec<MapSizeSample> {
        std::mem::take(&mut self.timeline)
    }
}

/// Peak resident set size of this process, if the platform reports it
pub fn peak_rss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmHWM:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(n: usize) -> MapSizes {
        MapSizes {
            cost: n,
            ..MapSizes::default()
        }
    }

    #[test]
    fn disabled_tracker_records_nothing() {
        let mut tracker = MemoryTracker::new(false, 1);
        tracker.tick(Phase::Forward, 0, sizes(1), 100);
        assert_eq!(tracker.record(Phase::Forward, 1, sizes(1), 100), 0);
        assert_eq!(tracker.peak_bytes(), 0);
        assert!(tracker.take_timeline().is_empty());
    }

    #[test]
    fn tick_samples_on_interval_and_tracks_peak() {
        let mut tracker = MemoryTracker::new(true, 2);
        for position in 0..5 {
            tracker.tick(Phase::Forward, position, sizes(position), position * 10);
        }
        let timeline = tracker.take_timeline();
        let positions: Vec<_> = timeline.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 2, 4]);
        assert_eq!(tracker.peak_bytes(), 40);
    }

    #[test]
    fn map_sizes_total() {
        let sizes = MapSizes {
            cost: 1,
            slack: 2,
            successors: 3,
            ..MapSizes::default()
        };
        assert_eq!(sizes.total(), 6);
    }
}
