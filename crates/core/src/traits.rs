//! Collaborator traits for the retention store writer
//!
//! The writer touches three independently failing resources: a key-value
//! store, a retention log and the shared watermark registry. Each is
//! reached through a trait so implementations can be swapped (in-memory,
//! file-backed, failure-injecting in tests) without touching the writer.
//!
//! Thread safety: all methods take `&self` and implementations must be safe
//! to call from multiple threads (requires Send + Sync).

use crate::clock::Clock;
use crate::error::Result;
use crate::event::Event;
use crate::types::Scn;

/// Persistent key-value map
pub trait DataStore<K, V>: Send + Sync {
    /// Get the current value for a key
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn get(&self, key: &K) -> Result<Option<V>>;

    /// Write a value under a key
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn put(&self, key: K, value: V) -> Result<()>;

    /// Remove a key
    ///
    /// Returns true if the key existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn delete(&self, key: &K) -> Result<bool>;

    /// Flush in-memory state to a recoverable but not necessarily durable form
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn sync(&self) -> Result<()>;

    /// Flush all state durably
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn persist(&self) -> Result<()>;
}

/// Append-only log of change events
pub trait Retention<K>: Send + Sync {
    /// Append an event
    ///
    /// Appends from one caller are kept in call order.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be recorded.
    fn append(&self, event: Event<K>) -> Result<()>;

    /// Greatest clock among all appended events, `Clock::zero()` if empty
    fn max_clock(&self) -> Clock;

    /// Clock of the oldest retained event, `Clock::zero()` if empty
    fn min_clock(&self) -> Clock;

    /// Number of retained events
    fn len(&self) -> usize;

    /// True when no events are retained
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events a consumer at `since` has not yet seen, in append order
    ///
    /// An event is returned unless its clock is before or equal to `since`.
    /// At most `limit` events are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    fn events_since(&self, since: &Clock, limit: usize) -> Result<Vec<Event<K>>>;

    /// Force appended events to durable storage
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> Result<()>;
}

/// Process-wide registry of per-source watermarks and the shared causal clock
///
/// One registry is shared by the writers of all sources. Implementations
/// serialize their own updates; callers never need an outer lock.
pub trait WaterMarksClock: Send + Sync {
    /// True if the source has a previously recorded entry
    fn has_source(&self, source: &str) -> bool;

    /// Recorded low watermark, `0` for an unknown source
    fn low_water_mark(&self, source: &str) -> Scn;

    /// Recorded high watermark, `0` for an unknown source
    fn high_water_mark(&self, source: &str) -> Scn;

    /// SCN of `source` as seen by `clock`
    fn water_mark(&self, source: &str, clock: &Clock) -> Scn;

    /// Overwrite the recorded watermark pair of a source
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be registered.
    fn update_water_marks(&self, source: &str, lwm: Scn, hwm: Scn) -> Result<()>;

    /// Snapshot of the shared clock
    fn current(&self) -> Clock;

    /// Advance the source's position in the shared clock to `hwm`
    ///
    /// Returns the resulting shared clock. The recorded high watermark is
    /// left alone until `set_hw_mark` publishes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be registered.
    fn update_hw_mark(&self, source: &str, hwm: Scn) -> Result<Clock>;

    /// Publish a high watermark as the source's recorded one
    ///
    /// Callers publish only progress their store has flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be registered.
    fn set_hw_mark(&self, source: &str, hwm: Scn) -> Result<()>;

    /// Advance a low watermark, clamped to the source's high watermark
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be registered.
    fn set_lw_mark(&self, source: &str, lwm: Scn) -> Result<()>;

    /// Write the source's published watermark record to disk
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    fn sync_water_marks(&self, source: &str) -> Result<()>;

    /// Write the on-disk record of every source
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be persisted.
    fn flush(&self) -> Result<()>;
}
