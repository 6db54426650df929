//! Core types for tidemark
//!
//! This crate defines the vocabulary shared by every layer:
//! - `Scn`: caller-assigned sequence/change number
//! - `Clock`: vector clock over the sources of a watermark registry
//! - `Event`: `(key, clock)` entry of a retention log
//! - `Mutation`: value or tombstone applied to a store
//! - Collaborator traits: `DataStore`, `Retention`, `WaterMarksClock`
//! - `Error` / `Result`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use clock::{Clock, Occurred};
pub use error::{Error, Result};
pub use event::Event;
pub use traits::{DataStore, Retention, WaterMarksClock};
pub use types::{Mutation, Scn};
