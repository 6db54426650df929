//! In-memory retention log

use parking_lot::RwLock;
use tidemark_core::{Clock, Event, Result, Retention};

use super::select_since;

#[derive(Debug)]
struct Inner<K> {
    events: Vec<Event<K>>,
    max_clock: Clock,
}

/// Retention log held entirely in memory
#[derive(Debug)]
pub struct MemoryRetention<K> {
    inner: RwLock<Inner<K>>,
}

impl<K> MemoryRetention<K> {
    /// Create an empty log
    pub fn new() -> Self {
        MemoryRetention {
            inner: RwLock::new(Inner {
                events: Vec::new(),
                max_clock: Clock::zero(),
            }),
        }
    }
}

impl<K: Clone> MemoryRetention<K> {
    /// Copy of every retained event in append order
    pub fn events(&self) -> Vec<Event<K>> {
        self.inner.read().events.clone()
    }
}

impl<K> Default for MemoryRetention<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Send + Sync> Retention<K> for MemoryRetention<K> {
    fn append(&self, event: Event<K>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.max_clock = inner.max_clock.merge(event.clock());
        inner.events.push(event);
        Ok(())
    }

    fn max_clock(&self) -> Clock {
        self.inner.read().max_clock.clone()
    }

    fn min_clock(&self) -> Clock {
        self.inner
            .read()
            .events
            .first()
            .map(|e| e.clock().clone())
            .unwrap_or_else(Clock::zero)
    }

    fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    fn events_since(&self, since: &Clock, limit: usize) -> Result<Vec<Event<K>>> {
        Ok(select_since(&self.inner.read().events, since, limit))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
