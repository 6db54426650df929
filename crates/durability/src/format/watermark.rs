//! Per-source watermark record
//!
//! Tracks the `(lwm, hwm)` pair of every source known to a registry, in the
//! registry's slot order. The order is part of the format: slot `i` of every
//! clock in a retention log refers to entry `i` of this file, so entries are
//! never reordered or removed.
//!
//! # Watermark Semantics
//!
//! - `hwm`: every change with SCN <= hwm has been admitted
//! - `lwm`: every change with SCN <= lwm is checkpointed; `lwm <= hwm`
//!
//! # Binary Format
//!
//! ```text
//! magic("TDWM", 4) + version(4) + count(4)
//! + count * [ name_len(2) + name + flags(1) + lwm(8) + hwm(8) ]
//! + crc32(4)
//! ```

use std::path::Path;

use tidemark_core::Scn;

use super::frame::write_atomic;

/// Magic bytes identifying a watermark file: "TDWM"
pub const WATERMARK_MAGIC: &[u8; 4] = b"TDWM";

/// Current watermark file format version
pub const WATERMARK_FORMAT_VERSION: u32 = 1;

const FLAG_RECORDED: u8 = 0x01;

/// Watermark state of one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaterMarkEntry {
    /// Source name
    pub source: String,
    /// Low watermark
    pub lwm: Scn,
    /// High watermark
    pub hwm: Scn,
    /// True once the source's watermarks have been written at least once
    pub recorded: bool,
}

impl WaterMarkEntry {
    /// Create a recorded entry
    pub fn new(source: impl Into<String>, lwm: Scn, hwm: Scn) -> Self {
        WaterMarkEntry {
            source: source.into(),
            lwm,
            hwm,
            recorded: true,
        }
    }

    /// Create a placeholder for a configured source with no history
    pub fn unrecorded(source: impl Into<String>) -> Self {
        WaterMarkEntry {
            source: source.into(),
            lwm: 0,
            hwm: 0,
            recorded: false,
        }
    }
}

/// Serialize entries to the watermark file format
pub fn encode_water_marks(entries: &[WaterMarkEntry]) -> Result<Vec<u8>, WatermarkError> {
    let mut buf = Vec::with_capacity(16 + entries.len() * 32);
    buf.extend_from_slice(WATERMARK_MAGIC);
    buf.extend_from_slice(&WATERMARK_FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    for entry in entries {
        let name = entry.source.as_bytes();
        let name_len =
            u16::try_from(name.len()).map_err(|_| WatermarkError::InvalidSourceName)?;
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(name);
        buf.push(if entry.recorded { FLAG_RECORDED } else { 0 });
        buf.extend_from_slice(&entry.lwm.to_le_bytes());
        buf.extend_from_slice(&entry.hwm.to_le_bytes());
    }

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Deserialize entries, validating magic, version and CRC
pub fn decode_water_marks(data: &[u8]) -> Result<Vec<WaterMarkEntry>, WatermarkError> {
    if data.len() < 16 {
        return Err(WatermarkError::InsufficientData);
    }

    if &data[0..4] != WATERMARK_MAGIC {
        return Err(WatermarkError::InvalidMagic);
    }

    let crc_offset = data.len() - 4;
    let stored = read_u32(&data[crc_offset..])?;
    let computed = crc32fast::hash(&data[..crc_offset]);
    if stored != computed {
        return Err(WatermarkError::ChecksumMismatch { stored, computed });
    }

    let version = read_u32(&data[4..8])?;
    if version != WATERMARK_FORMAT_VERSION {
        return Err(WatermarkError::UnsupportedVersion(version));
    }

    let count = read_u32(&data[8..12])? as usize;
    let body = &data[12..crc_offset];
    let mut pos = 0;
    let mut entries = Vec::with_capacity(count);

    for _ in 0..count {
        let name_len = body
            .get(pos..pos + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
            .ok_or(WatermarkError::InsufficientData)?;
        pos += 2;

        let name = body
            .get(pos..pos + name_len)
            .ok_or(WatermarkError::InsufficientData)?;
        let source = std::str::from_utf8(name)
            .map_err(|_| WatermarkError::InvalidSourceName)?
            .to_string();
        pos += name_len;

        let flags = *body.get(pos).ok_or(WatermarkError::InsufficientData)?;
        pos += 1;

        let lwm = read_u64(body.get(pos..pos + 8).ok_or(WatermarkError::InsufficientData)?)?;
        pos += 8;
        let hwm = read_u64(body.get(pos..pos + 8).ok_or(WatermarkError::InsufficientData)?)?;
        pos += 8;

        entries.push(WaterMarkEntry {
            source,
            lwm,
            hwm,
            recorded: flags & FLAG_RECORDED != 0,
        });
    }

    if pos != body.len() {
        return Err(WatermarkError::TrailingBytes(body.len() - pos));
    }

    Ok(entries)
}

/// Write entries to `path` atomically
pub fn write_water_marks(path: &Path, entries: &[WaterMarkEntry]) -> Result<(), WatermarkError> {
    let bytes = encode_water_marks(entries)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Read entries from `path`
///
/// Returns `Ok(None)` if the file does not exist.
pub fn read_water_marks(path: &Path) -> Result<Option<Vec<WaterMarkEntry>>, WatermarkError> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(decode_water_marks(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WatermarkError::Io(e)),
    }
}

fn read_u32(bytes: &[u8]) -> Result<u32, WatermarkError> {
    bytes
        .get(0..4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_le_bytes)
        .ok_or(WatermarkError::InsufficientData)
}

fn read_u64(bytes: &[u8]) -> Result<u64, WatermarkError> {
    bytes
        .get(0..8)
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map(u64::from_le_bytes)
        .ok_or(WatermarkError::InsufficientData)
}

/// Errors that can occur reading or writing the watermark file
#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    /// Insufficient data for deserialization
    #[error("Insufficient data for watermark file")]
    InsufficientData,

    /// File does not start with "TDWM"
    #[error("Invalid watermark file magic")]
    InvalidMagic,

    /// Unknown format version
    #[error("Unsupported watermark file version: {0}")]
    UnsupportedVersion(u32),

    /// CRC mismatch
    #[error("Watermark file checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// CRC stored in the file
        stored: u32,
        /// CRC computed over the content
        computed: u32,
    },

    /// Bytes left over after the last entry
    #[error("Watermark file has {0} trailing bytes")]
    TrailingBytes(usize),

    /// Source name is not UTF-8 or is too long
    #[error("Invalid source name in watermark file")]
    InvalidSourceName,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WatermarkError> for tidemark_core::Error {
    fn from(e: WatermarkError) -> Self {
        match e {
            WatermarkError::Io(io) => tidemark_core::Error::IoError(io),
            other => tidemark_core::Error::Corruption(other.to_string()),
        }
    }
}
