//! Retention logs
//!
//! A retention log is the append-only record of `(key, clock)` events
//! written by a retention store writer. Downstream consumers read it with
//! `events_since` to learn which keys changed after a clock they have
//! already processed.
//!
//! - **MemoryRetention**: events kept in a `Vec`, nothing survives restart
//! - **SegmentRetention**: events framed into `retention.log`, fsynced per
//!   the configured `DurabilityMode`, rebuilt on open
//!
//! Trimming old events is not implemented; both logs keep every event.

mod memory;
mod segment;

pub use memory::MemoryRetention;
pub use segment::{SegmentRetention, RETENTION_FILE_NAME, RETENTION_MAGIC};

use tidemark_core::{Clock, Event};

/// Events of `events` not before-or-equal to `since`, at most `limit`
fn select_since<K: Clone>(events: &[Event<K>], since: &Clock, limit: usize) -> Vec<Event<K>> {
    events
        .iter()
        .filter(|e| !e.clock().before_eq(since))
        .take(limit)
        .cloned()
        .collect()
}
