//! TraceReplayer - forward/backward iteration with direction-scoped callbacks
//!
//! The only iteration primitive of the crate. Synchronous, no I/O, never
//! blocks. Callbacks run in registration order; a callback registered for
//! one direction is never invoked by a replay in the other.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::trace::{Event, Trace};

/// Replay direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Insertion order
    Forward,
    /// Exact reverse of insertion order
    Backward,
}

/// Boxed per-event callback
pub type ReplayCallback = Box<dyn FnMut(&Event) + Send>;

struct Registration {
    name: String,
    callback: ReplayCallback,
}

/// Visit `events` in `direction`, calling `visit` for each
#[inline]
pub fn for_each_event<'a>(events: &'a [Event], direction: Direction, visit: impl FnMut(&'a Event)) {
    match direction {
        Direction::Forward => events.iter().for_each(visit),
        Direction::Backward => events.iter().rev().for_each(visit),
    }
}

/// Holds a trace and named callbacks per direction
#[derive(Default)]
pub struct TraceReplayer {
    trace: Option<Arc<Trace>>,
    forward: Vec<Registration>,
    backward: Vec<Registration>,
}

impl TraceReplayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(trace: Arc<Trace>) -> Self {
        Self {
            trace: Some(trace),
            ..Self::default()
        }
    }

    pub fn set_trace(&mut self, trace: Arc<Trace>) {
        self.trace = Some(trace);
    }

    pub fn take_trace(&mut self) -> Option<Arc<Trace>> {
        self.trace.take()
    }

    pub fn trace(&self) -> Option<&Arc<Trace>> {
        self.trace.as_ref()
    }

    fn slot(&self, direction: Direction) -> &Vec<Registration> {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    fn slot_mut(&mut self, direction: Direction) -> &mut Vec<Registration> {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Backward => &mut self.backward,
        }
    }

    /// Register `callback` under `name`.
    ///
    /// An existing registration with the same name is replaced in place,
    /// keeping its position in the invocation order.
    pub fn register<F>(&mut self, direction: Direction, name: impl Into<String>, callback: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let name = name.into();
        let callback: ReplayCallback = Box::new(callback);
        let slot = self.slot_mut(direction);
        match slot.iter_mut().find(|r| r.name == name) {
            Some(existing) => existing.callback = callback,
            None => slot.push(Registration { name, callback }),
        }
    }

    /// Remove a callback; returns false if the name was not registered
    pub fn unregister(&mut self, direction: Direction, name: &str) -> bool {
        let slot = self.slot_mut(direction);
        let before = slot.len();
        slot.retain(|r| r.name != name);
        slot.len() != before
    }

    /// Registered names in invocation order
    pub fn callback_names(&self, direction: Direction) -> Vec<&str> {
        self.slot(direction).iter().map(|r| r.name.as_str()).collect()
    }

    pub fn has_callbacks(&self, direction: Direction) -> bool {
        !self.slot(direction).is_empty()
    }

    /// Replay the trace, invoking every callback of `direction` per event.
    ///
    /// Returns the number of events visited (0 when no trace is set).
    pub fn replay(&mut self, direction: Direction) -> usize {
        self.replay_with(direction, |_| {})
    }

    /// Replay with an extra visitor that runs before the registered callbacks
    pub fn replay_with(&mut self, direction: Direction, mut visit: impl FnMut(&Event)) -> usize {
        let Some(trace) = self.trace.clone() else {
            return 0;
        };
        let callbacks = match direction {
            Direction::Forward => &mut self.forward,
            Direction::Backward => &mut self.backward,
        };

        for_each_event(trace.events(), direction, |event| {
            visit(event);
            for registration in callbacks.iter_mut() {
                (registration.callback)(event);
            }
        });

        trace.len()
    }
}

impl fmt::Debug for TraceReplayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceReplayer")
            .field("events", &self.trace.as_ref().map(|t| t.len()))
            .field("forward", &self.callback_names(Direction::Forward))
            .field("backward", &self.callback_names(Direction::Backward))
            .finish()
    }
}
