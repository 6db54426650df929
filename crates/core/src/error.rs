//! Error types for tidemark
//!
//! This module defines the error type shared by every layer.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for tidemark operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for tidemark
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, fsync, rename)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data corruption detected (bad magic, checksum mismatch, truncated record)
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invalid input (bad configuration value, malformed source name)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    StorageError(String),
}

impl Error {
    /// Build a `Corruption` error from anything displayable
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Build an `InvalidInput` error from anything displayable
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Build a `StorageError` from anything displayable
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::StorageError(msg.into())
    }
}
