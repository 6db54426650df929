//! Durability layer for tidemark
//!
//! This crate handles everything about progress that touches disk:
//!
//! - Watermark registry: per-source `(lwm, hwm)` pairs and the shared
//!   causal clock, persisted to `watermarks.scn`
//! - Retention logs: append-only `(key, clock)` event logs
//! - Durability modes: Cache, Standard (default), Always
//! - Binary on-disk formats (checksummed frames, watermark file)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod format;
pub mod mode;
pub mod retention;
pub mod watermarks;

pub use format::{WaterMarkEntry, WatermarkError};
pub use mode::DurabilityMode;
pub use retention::{MemoryRetention, SegmentRetention, RETENTION_FILE_NAME};
pub use watermarks::SourceWaterMarksClock;

/// File name of the watermark registry inside a data directory
pub const WATERMARKS_FILE_NAME: &str = "watermarks.scn";
