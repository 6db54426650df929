//! Checksummed record framing and atomic file replacement
//!
//! # Frame Layout
//!
//! ```text
//! ┌─────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! The CRC covers the payload only. A frame cut short by a crash reads as
//! `Incomplete`; a frame whose checksum does not match reads as `Corrupt`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Bytes a frame adds around its payload
pub const FRAME_OVERHEAD: usize = 8;

/// Result of decoding one frame from the front of a buffer
#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead<'a> {
    /// A whole, checksum-valid frame
    Complete {
        /// Frame payload
        payload: &'a [u8],
        /// Bytes consumed including length and CRC
        consumed: usize,
    },
    /// Buffer ends inside the frame
    Incomplete,
    /// Checksum mismatch
    Corrupt {
        /// CRC stored in the frame
        stored: u32,
        /// CRC computed over the payload
        computed: u32,
    },
}

/// Wrap a payload in a length-prefixed, checksummed frame
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf
}

/// Decode the frame at the start of `buf`
pub fn decode_frame(buf: &[u8]) -> FrameRead<'_> {
    let len = match buf.get(0..4).and_then(|b| <[u8; 4]>::try_from(b).ok()) {
        Some(b) => u32::from_le_bytes(b) as usize,
        None => return FrameRead::Incomplete,
    };

    let end = 4 + len;
    let crc_bytes = match buf.get(end..end + 4).and_then(|b| <[u8; 4]>::try_from(b).ok()) {
        Some(b) => b,
        None => return FrameRead::Incomplete,
    };

    let payload = &buf[4..end];
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return FrameRead::Corrupt { stored, computed };
    }

    FrameRead::Complete {
        payload,
        consumed: end + 4,
    }
}

/// Frames decoded from a buffer up to the first bad or partial frame
#[derive(Debug)]
pub struct FrameScan<'a> {
    /// Payloads of all valid leading frames, in order
    pub payloads: Vec<&'a [u8]>,
    /// Length of the valid prefix of the buffer
    pub valid_len: usize,
    /// True if bytes after `valid_len` were discarded
    pub torn_tail: bool,
}

/// Decode consecutive frames until the buffer ends or a frame is damaged
pub fn scan_frames(buf: &[u8]) -> FrameScan<'_> {
    let mut payloads = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        match decode_frame(&buf[offset..]) {
            FrameRead::Complete { payload, consumed } => {
                payloads.push(payload);
                offset += consumed;
            }
            FrameRead::Incomplete | FrameRead::Corrupt { .. } => break,
        }
    }

    FrameScan {
        payloads,
        valid_len: offset,
        torn_tail: offset < buf.len(),
    }
}

/// Replace `path` with `bytes` using write-fsync-rename
///
/// Readers observe either the old or the new content, never a mix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = Path::new(&temp_name);

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(temp_path, path)?;

    // Sync parent directory
    if let Some(parent) = path.parent() {
        if parent.exists() && !parent.as_os_str().is_empty() {
            let dir_fd = File::open(parent)?;
            dir_fd.sync_all()?;
        }
    }

    Ok(())
}
