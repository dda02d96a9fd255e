//! Cost models - per-event duration used by the CPM passes
//!
//! No duration model is derived from timestamps; the constant cost is a
//! placeholder. Inject a [`CostModel`] to change it.

use crate::trace::Event;

/// Cost assigned to every event by [`ConstantCost::default`]
pub const DEFAULT_COST: f64 = 1.0;

/// Strategy returning the cost (duration) of an event
pub trait CostModel: Send + Sync {
    fn cost(&self, event: &Event) -> f64;
}

/// Same cost for every event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantCost(pub f64);

impl Default for ConstantCost {
    fn default() -> Self {
        Self(DEFAULT_COST)
    }
}

impl CostModel for ConstantCost {
    #[inline]
    fn cost(&self, _event: &Event) -> f64 {
        self.0
    }
}

impl<F> CostModel for F
where
    F: Fn(&Event) -> f64 + Send + Sync,
{
    #[inline]
    fn cost(&self, event: &Event) -> f64 {
        self(event)
    }
}
