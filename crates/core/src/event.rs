//! Retention events
//!
//! An event records that a key changed at a causal point. The value is not
//! part of the event; only the store holds values.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// Immutable `(key, clock)` pair appended to a retention log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event<K> {
    key: K,
    clock: Clock,
}

impl<K> Event<K> {
    /// Create a new event
    pub fn new(key: K, clock: Clock) -> Self {
        Event { key, clock }
    }

    /// Key that changed
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Causal clock of the change
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Split into key and clock
    pub fn into_parts(self) -> (K, Clock) {
        (self.key, self.clock)
    }
}
