//! String interning for recurring event names
//!
//! Traces repeat the same handful of region/function names millions of times.
//! Each unique name is stored once and shared through `Arc<str>`.
//! Uses DashMap for lock-free concurrent access from reader threads.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Global name interner (thread-safe, lock-free)
static INTERNER: Lazy<Interner> = Lazy::new(Interner::new);

/// Thread-safe string interner using DashMap
pub struct Interner {
    names: DashMap<Arc<str>, ()>,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            names: DashMap::new(),
        }
    }

    /// Intern a name, returning the shared `Arc<str>`
    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(existing) = self.names.get(s) {
            return Arc::clone(existing.key());
        }

        // entry() keeps the first writer's Arc when two threads race
        let key: Arc<str> = Arc::from(s);
        let entry = self.names.entry(key).or_insert(());
        Arc::clone(entry.key())
    }

    /// Number of interned names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

/// Intern an event name using the global interner
#[inline]
pub fn intern(s: &str) -> Arc<str> {
    INTERNER.intern(s)
}
