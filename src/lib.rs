//! Tidemark - watermark-tracked store writer with a causally ordered retention log
//!
//! A writer admits changes numbered by a per-source SCN (system change
//! number), applies them to a key/value store, and appends one event per
//! admitted change to a retention log. Every event carries a vector clock
//! taken from a registry shared by all sources, so consumers can order
//! events across sources.
//!
//! # Quick Start
//!
//! ```ignore
//! use tidemark::Environment;
//!
//! let env = Environment::open("/var/lib/tidemark")?;
//! let writer = env.writer("orders")?;
//!
//! // Resume from writer.hw_mark() after a restart
//! writer.put(b"order:1".to_vec(), b"pending".to_vec(), 101)?;
//! writer.delete(b"order:0".to_vec(), 102)?;
//!
//! env.checkpoint()?;
//! ```

pub use tidemark_core::{
    Clock, DataStore, Error, Event, Mutation, Occurred, Result, Retention, Scn, WaterMarksClock,
};
pub use tidemark_durability::{
    DurabilityMode, MemoryRetention, SegmentRetention, SourceWaterMarksClock,
};
pub use tidemark_engine::{
    ByteWriter, Environment, RetentionStoreWriter, StoreKind, TidemarkConfig,
};
pub use tidemark_storage::{FileStore, MemoryStore};
