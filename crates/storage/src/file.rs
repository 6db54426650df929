//! FileStore: durable byte-keyed store with snapshot + redo log
//!
//! # Files
//!
//! - `store.snap`: full snapshot, one checksummed frame, replaced atomically
//! - `store.log`: redo log of checksummed put/delete frames since the snapshot
//!
//! # Durability Levels
//!
//! | Call | Effect |
//! |------|--------|
//! | `put`/`delete` | record buffered in process memory |
//! | `sync()` | buffer handed to the OS (survives process crash) |
//! | `persist()` | snapshot fsynced and renamed, redo log emptied |
//!
//! Recovery loads the snapshot then replays the redo log. Replaying a
//! record already covered by the snapshot is harmless because puts and
//! deletes applied in order converge to the same state.
//!
//! The redo log only ever holds whole frames: buffered frames are written
//! in one go, and a failed write cuts the file back to its last valid
//! length while keeping the buffer for the next attempt.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::{Mutex, RwLock};
use tidemark_core::{DataStore, Error, Result};
use tidemark_durability::format::{decode_frame, encode_frame, scan_frames, write_atomic, FrameRead};

/// Snapshot file name
pub const SNAPSHOT_FILE_NAME: &str = "store.snap";

/// Redo log file name
pub const REDO_LOG_FILE_NAME: &str = "store.log";

/// Magic bytes identifying a store snapshot: "TDSS"
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"TDSS";

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// Redo log record
#[derive(Debug, Clone, PartialEq, Eq)]
enum Record {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

impl Record {
    fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Record::Put(key, value) => {
                buf.write_u8(OP_PUT)?;
                write_bytes(&mut buf, key)?;
                write_bytes(&mut buf, value)?;
            }
            Record::Delete(key) => {
                buf.write_u8(OP_DELETE)?;
                write_bytes(&mut buf, key)?;
            }
        }
        Ok(buf)
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(payload);
        let record = match cursor.read_u8()? {
            OP_PUT => {
                let key = read_bytes(&mut cursor)?;
                let value = read_bytes(&mut cursor)?;
                Record::Put(key, value)
            }
            OP_DELETE => Record::Delete(read_bytes(&mut cursor)?),
            other => {
                return Err(Error::corruption(format!(
                    "unknown redo record op {}",
                    other
                )))
            }
        };
        Ok(record)
    }

    fn apply(self, data: &mut BTreeMap<Vec<u8>, Vec<u8>>) {
        match self {
            Record::Put(key, value) => {
                data.insert(key, value);
            }
            Record::Delete(key) => {
                data.remove(&key);
            }
        }
    }
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> std::io::Result<()> {
    buf.write_u32::<LittleEndian>(bytes.len() as u32)?;
    buf.write_all(bytes)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(Error::corruption(format!(
            "length {} exceeds remaining {} bytes",
            len, remaining
        )));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn encode_snapshot(data: &BTreeMap<Vec<u8>, Vec<u8>>) -> std::io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    payload.write_all(SNAPSHOT_MAGIC)?;
    payload.write_u32::<LittleEndian>(SNAPSHOT_FORMAT_VERSION)?;
    payload.write_u64::<LittleEndian>(data.len() as u64)?;
    for (key, value) in data {
        write_bytes(&mut payload, key)?;
        write_bytes(&mut payload, value)?;
    }
    Ok(encode_frame(&payload))
}

fn decode_snapshot(bytes: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    let payload = match decode_frame(bytes) {
        FrameRead::Complete { payload, consumed } if consumed == bytes.len() => payload,
        FrameRead::Complete { .. } => {
            return Err(Error::corruption("trailing bytes after store snapshot"))
        }
        FrameRead::Incomplete => return Err(Error::corruption("store snapshot truncated")),
        FrameRead::Corrupt { stored, computed } => {
            return Err(Error::corruption(format!(
                "store snapshot checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            )))
        }
    };

    let mut cursor = Cursor::new(payload);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(Error::corruption("invalid store snapshot magic"));
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != SNAPSHOT_FORMAT_VERSION {
        return Err(Error::corruption(format!(
            "unsupported store snapshot version {}",
            version
        )));
    }

    let count = cursor.read_u64::<LittleEndian>()?;
    let mut data = BTreeMap::new();
    for _ in 0..count {
        let key = read_bytes(&mut cursor)?;
        let value = read_bytes(&mut cursor)?;
        data.insert(key, value);
    }
    Ok(data)
}

/// Buffered frames are written once they reach this size
const REDO_BUFFER_SIZE: usize = 64 * 1024;

/// Append target of the redo log
trait LogFile: Write {
    /// Cut the file back to `len` bytes
    fn truncate(&mut self, len: u64) -> std::io::Result<()>;

    /// fsync data and metadata
    fn sync_all(&mut self) -> std::io::Result<()>;
}

impl LogFile for File {
    fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }

    fn sync_all(&mut self) -> std::io::Result<()> {
        File::sync_all(self)
    }
}

/// Redo log writer that never leaves a partial frame ahead of later ones
struct RedoLog<F: LogFile = File> {
    file: F,
    /// Whole frames not yet handed to the file
    pending: Vec<u8>,
    /// Length of the file's valid prefix
    file_len: u64,
}

impl<F: LogFile> RedoLog<F> {
    fn new(file: F, file_len: u64) -> Self {
        RedoLog {
            file,
            pending: Vec::new(),
            file_len,
        }
    }

    /// Buffer a whole frame, writing earlier frames first if the buffer is full
    ///
    /// On error the frame is not buffered.
    fn append(&mut self, frame: &[u8]) -> std::io::Result<()> {
        if !self.pending.is_empty() && self.pending.len() + frame.len() > REDO_BUFFER_SIZE {
            self.flush()?;
        }
        self.pending.extend_from_slice(frame);
        Ok(())
    }

    /// Write every buffered frame to the file
    fn flush(&mut self) -> std::io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.file.write_all(&self.pending) {
            // Drop the partial write; the frames stay buffered for a retry
            let _ = self.file.truncate(self.file_len);
            return Err(e);
        }
        self.file_len += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    /// Empty the log once a snapshot covers everything in it
    fn reset(&mut self) -> std::io::Result<()> {
        self.file.truncate(0)?;
        self.file.sync_all()?;
        self.pending.clear();
        self.file_len = 0;
        Ok(())
    }
}

impl<F: LogFile> Drop for RedoLog<F> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Durable store for byte keys and values
pub struct FileStore {
    dir: PathBuf,
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    log: Mutex<RedoLog>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("dir", &self.dir)
            .field("keys", &self.data.read().len())
            .finish()
    }
}

impl FileStore {
    /// Open (or create) a store in `dir`, recovering snapshot and redo log
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let snap_path = dir.join(SNAPSHOT_FILE_NAME);
        let mut data = match std::fs::read(&snap_path) {
            Ok(bytes) => decode_snapshot(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let log_path = dir.join(REDO_LOG_FILE_NAME);
        let log_bytes = match std::fs::read(&log_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let scan = scan_frames(&log_bytes);
        let replayed = scan.payloads.len();
        for payload in scan.payloads {
            Record::decode(payload)?.apply(&mut data);
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        if scan.torn_tail {
            tracing::warn!(
                target: "tidemark::store",
                path = %log_path.display(),
                valid_len = scan.valid_len,
                discarded = log_bytes.len() - scan.valid_len,
                "Truncating torn tail of redo log"
            );
            file.set_len(scan.valid_len as u64)?;
            file.sync_all()?;
        }

        tracing::info!(
            target: "tidemark::store",
            dir = %dir.display(),
            keys = data.len(),
            replayed,
            "File store opened"
        );

        Ok(FileStore {
            dir,
            data: RwLock::new(data),
            log: Mutex::new(RedoLog::new(file, scan.valid_len as u64)),
        })
    }

    /// Directory holding the store files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True when no keys are live
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn log_record(&self, record: Record) -> Result<()> {
        let frame = encode_frame(&record.encode()?);
        let mut log = self.log.lock();
        log.append(&frame)?;
        record.apply(&mut self.data.write());
        Ok(())
    }
}

impl DataStore<Vec<u8>, Vec<u8>> for FileStore {
    fn get(&self, key: &Vec<u8>) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.log_record(Record::Put(key, value))
    }

    fn delete(&self, key: &Vec<u8>) -> Result<bool> {
        if !self.data.read().contains_key(key) {
            return Ok(false);
        }
        self.log_record(Record::Delete(key.clone()))?;
        Ok(true)
    }

    fn sync(&self) -> Result<()> {
        self.log.lock().flush()?;
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let mut log = self.log.lock();

        let snapshot = encode_snapshot(&self.data.read())?;
        write_atomic(&self.dir.join(SNAPSHOT_FILE_NAME), &snapshot)?;

        // Snapshot is durable; the redo records it covers can go
        log.reset()?;

        tracing::debug!(
            target: "tidemark::store",
            dir = %self.dir.display(),
            bytes = snapshot.len(),
            "Store snapshot persisted"
        );
        Ok(())
    }
}
