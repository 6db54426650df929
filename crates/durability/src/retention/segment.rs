//! File-backed retention log
//!
//! # File Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Header: magic "TDRL"(4) version(4) │
//! ├────────────────────────────────────┤
//! │ Frame 1                            │
//! ├────────────────────────────────────┤
//! │ Frame 2                            │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//!
//! Frame payload:
//! ┌──────────────┬──────────────────────┬─────────────────────────┐
//! │ KeyLen (4)   │ Key (MessagePack)    │ Clock (Clock::to_bytes) │
//! └──────────────┴──────────────────────┴─────────────────────────┘
//! ```
//!
//! On open every frame is decoded to rebuild the in-memory index and the
//! maximum clock. A frame cut short by a crash is truncated away; events
//! behind it were never acknowledged under `Always`, and under `Standard`
//! they fall inside the documented loss window.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tidemark_core::{Clock, Error, Event, Result, Retention};

use super::select_since;
use crate::format::{encode_frame, scan_frames};
use crate::mode::DurabilityMode;

/// File name of the retention log inside its directory
pub const RETENTION_FILE_NAME: &str = "retention.log";

/// Magic bytes identifying a retention log: "TDRL"
pub const RETENTION_MAGIC: &[u8; 4] = b"TDRL";

const RETENTION_FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: u64 = 8;

struct Inner<K> {
    events: Vec<Event<K>>,
    max_clock: Clock,
    /// Open log file (None when DurabilityMode::Cache)
    file: Option<File>,
    /// Length of the valid prefix of the file
    file_len: u64,
    appends_since_sync: usize,
    last_sync: Instant,
}

/// Retention log persisted to `retention.log`
pub struct SegmentRetention<K> {
    inner: RwLock<Inner<K>>,
    path: PathBuf,
    mode: DurabilityMode,
}

impl<K> std::fmt::Debug for SegmentRetention<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentRetention")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish()
    }
}

fn encode_event<K: Serialize>(event: &Event<K>) -> Result<Vec<u8>> {
    let key = rmp_serde::to_vec(event.key())
        .map_err(|e| Error::SerializationError(e.to_string()))?;
    let clock = event.clock().to_bytes();

    let mut payload = Vec::with_capacity(4 + key.len() + clock.len());
    payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
    payload.extend_from_slice(&key);
    payload.extend_from_slice(&clock);
    Ok(payload)
}

fn decode_event<K: DeserializeOwned>(payload: &[u8]) -> Result<Event<K>> {
    let key_len = payload
        .get(0..4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| Error::corruption("retention record missing key length"))?
        as usize;
    let key_bytes = payload
        .get(4..4 + key_len)
        .ok_or_else(|| Error::corruption("retention record key truncated"))?;
    let key = rmp_serde::from_slice(key_bytes)
        .map_err(|e| Error::SerializationError(e.to_string()))?;
    let clock = Clock::from_bytes(&payload[4 + key_len..])?;
    Ok(Event::new(key, clock))
}

fn header_bytes() -> [u8; HEADER_SIZE as usize] {
    let mut bytes = [0u8; HEADER_SIZE as usize];
    bytes[0..4].copy_from_slice(RETENTION_MAGIC);
    bytes[4..8].copy_from_slice(&RETENTION_FORMAT_VERSION.to_le_bytes());
    bytes
}

impl<K> SegmentRetention<K>
where
    K: Serialize + DeserializeOwned,
{
    /// Open (or create) the retention log in `dir`
    ///
    /// In `Cache` mode no file is created and the log starts empty.
    pub fn open(dir: impl AsRef<Path>, mode: DurabilityMode) -> Result<Self> {
        let path = dir.as_ref().join(RETENTION_FILE_NAME);

        if !mode.requires_file() {
            return Ok(Self::with_state(path, mode, Vec::new(), None, 0));
        }

        std::fs::create_dir_all(dir.as_ref())?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        if (bytes.len() as u64) < HEADER_SIZE {
            // Empty, or a header torn during creation
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header_bytes())?;
            file.sync_all()?;
            return Ok(Self::with_state(path, mode, Vec::new(), Some(file), HEADER_SIZE));
        }

        if &bytes[0..4] != RETENTION_MAGIC {
            return Err(Error::corruption(format!(
                "{} is not a retention log",
                path.display()
            )));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != RETENTION_FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "unsupported retention log version {}",
                version
            )));
        }

        let scan = scan_frames(&bytes[HEADER_SIZE as usize..]);
        let events = scan
            .payloads
            .iter()
            .map(|payload| decode_event(payload))
            .collect::<Result<Vec<Event<K>>>>()?;

        let file_len = HEADER_SIZE + scan.valid_len as u64;
        if scan.torn_tail {
            tracing::warn!(
                target: "tidemark::retention",
                path = %path.display(),
                valid_len = file_len,
                discarded = bytes.len() as u64 - file_len,
                "Truncating torn tail of retention log"
            );
            file.set_len(file_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(file_len))?;

        tracing::info!(
            target: "tidemark::retention",
            path = %path.display(),
            events = events.len(),
            "Retention log opened"
        );

        Ok(Self::with_state(path, mode, events, Some(file), file_len))
    }
}

impl<K> SegmentRetention<K> {
    fn with_state(
        path: PathBuf,
        mode: DurabilityMode,
        events: Vec<Event<K>>,
        file: Option<File>,
        file_len: u64,
    ) -> Self {
        let max_clock = events
            .iter()
            .fold(Clock::zero(), |acc, e| acc.merge(e.clock()));
        SegmentRetention {
            inner: RwLock::new(Inner {
                events,
                max_clock,
                file,
                file_len,
                appends_since_sync: 0,
                last_sync: Instant::now(),
            }),
            path,
            mode,
        }
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durability mode of this log
    pub fn mode(&self) -> DurabilityMode {
        self.mode
    }

    /// Appends written since the last fsync
    pub fn unsynced_appends(&self) -> usize {
        self.inner.read().appends_since_sync
    }

    /// fsync if `Standard` mode's interval has passed with appends pending
    ///
    /// Returns true if an fsync happened. Appends only check the interval
    /// when they arrive, so a flush thread calls this to bound the unsynced
    /// tail of an idle log as well.
    pub fn sync_if_overdue(&self) -> Result<bool> {
        let interval_ms = match self.mode {
            DurabilityMode::Standard { interval_ms, .. } => interval_ms,
            DurabilityMode::Always | DurabilityMode::Cache => return Ok(false),
        };

        let mut inner = self.inner.write();
        if inner.appends_since_sync == 0
            || (inner.last_sync.elapsed().as_millis() as u64) < interval_ms
        {
            return Ok(false);
        }
        inner.sync()?;
        Ok(true)
    }
}

impl<K> Inner<K> {
    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        let file = match self.file.as_mut() {
            Some(f) => f,
            None => return Ok(()),
        };

        if let Err(e) = file.write_all(frame) {
            // Drop the partial frame so later appends stay readable
            let _ = file.set_len(self.file_len);
            let _ = file.seek(SeekFrom::Start(self.file_len));
            return Err(e);
        }
        self.file_len += frame.len() as u64;
        self.appends_since_sync += 1;
        Ok(())
    }

    fn sync(&mut self) -> std::io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.sync_data()?;
        }
        self.appends_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    fn maybe_sync(&mut self, mode: DurabilityMode) -> std::io::Result<()> {
        match mode {
            DurabilityMode::Always => self.sync(),
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => {
                if self.appends_since_sync >= batch_size
                    || self.last_sync.elapsed().as_millis() as u64 >= interval_ms
                {
                    self.sync()
                } else {
                    Ok(())
                }
            }
            DurabilityMode::Cache => Ok(()),
        }
    }
}

impl<K> Retention<K> for SegmentRetention<K>
where
    K: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn append(&self, event: Event<K>) -> Result<()> {
        let frame = if self.mode.requires_file() {
            Some(encode_frame(&encode_event(&event)?))
        } else {
            None
        };

        let mut inner = self.inner.write();
        if let Some(frame) = frame {
            inner.write_frame(&frame)?;
            inner.maybe_sync(self.mode)?;
        }
        inner.max_clock = inner.max_clock.merge(event.clock());
        inner.events.push(event);
        Ok(())
    }

    fn max_clock(&self) -> Clock {
        self.inner.read().max_clock.clone()
    }

    fn min_clock(&self) -> Clock {
        self.inner
            .read()
            .events
            .first()
            .map(|e| e.clock().clone())
            .unwrap_or_else(Clock::zero)
    }

    fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    fn events_since(&self, since: &Clock, limit: usize) -> Result<Vec<Event<K>>> {
        Ok(select_since(&self.inner.read().events, since, limit))
    }

    fn flush(&self) -> Result<()> {
        self.inner.write().sync()?;
        Ok(())
    }
}
