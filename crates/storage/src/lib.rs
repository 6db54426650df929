//! Storage layer for tidemark
//!
//! This crate implements the `DataStore` backends a retention store writer
//! mutates:
//! - MemoryStore: BTreeMap with RwLock, plus a copy of the last persisted state
//! - FileStore: byte-keyed store recovered from a snapshot and a redo log
//!
//! # Flush Levels
//!
//! Both stores distinguish `sync()` (recoverable after a process crash)
//! from `persist()` (durable across power loss).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
