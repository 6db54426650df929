//! Writer and environment for tidemark
//!
//! This crate ties the lower layers together:
//! - Writer: SCN admission, store mutation, retention append, watermarks
//! - Config: `tidemark.toml`
//! - Environment: one directory, one shared registry, a writer per source
//!
//! The writer only sees the collaborator traits from `tidemark-core`;
//! the environment picks the concrete store, log and registry.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod environment;
pub mod writer;

pub use config::{validate_source_name, StoreKind, TidemarkConfig, CONFIG_FILE_NAME};
pub use environment::{ByteWriter, Environment, SOURCES_DIR_NAME};
pub use writer::RetentionStoreWriter;
