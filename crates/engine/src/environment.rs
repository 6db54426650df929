//! Environment: one directory, one shared registry, one writer per source
//!
//! ```text
//! <dir>/
//! ├── tidemark.toml          configuration
//! ├── watermarks.scn         shared watermark registry
//! └── sources/<source>/
//!     ├── store.snap         store snapshot   (file store only)
//!     ├── store.log          store change log (file store only)
//!     └── retention.log      retention events (unless durability = cache)
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tidemark_core::{DataStore, Error, Result, Retention, WaterMarksClock};
use tidemark_durability::{
    DurabilityMode, SegmentRetention, SourceWaterMarksClock, WATERMARKS_FILE_NAME,
};
use tidemark_storage::{FileStore, MemoryStore};

use crate::config::{validate_source_name, StoreKind, TidemarkConfig, CONFIG_FILE_NAME};
use crate::writer::RetentionStoreWriter;

/// Directory holding per-source state below the environment root.
pub const SOURCES_DIR_NAME: &str = "sources";

/// Writer over byte keys and values with type-erased store and log
pub type ByteWriter = RetentionStoreWriter<
    Vec<u8>,
    Vec<u8>,
    dyn DataStore<Vec<u8>, Vec<u8>>,
    dyn Retention<Vec<u8>>,
>;

type RetentionMap = HashMap<String, Arc<SegmentRetention<Vec<u8>>>>;

/// A directory of sources sharing one watermark registry
///
/// `writer` hands out one writer per source for the life of the
/// environment. In standard durability a background thread fsyncs
/// retention logs whose interval has passed; it is stopped and joined on
/// drop. Nothing else is flushed on drop; call [`checkpoint`](Self::checkpoint).
pub struct Environment {
    dir: PathBuf,
    config: TidemarkConfig,
    water_marks: Arc<SourceWaterMarksClock>,
    writers: Mutex<HashMap<String, Arc<ByteWriter>>>,

    /// Typed handles to every writer's retention log, shared with the flush thread
    retentions: Arc<Mutex<RetentionMap>>,

    /// Shutdown signal for the background flush thread
    flush_shutdown: Arc<AtomicBool>,

    /// Background retention flush thread (standard durability only)
    flush_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Environment {
    /// Open (or create) an environment, reading `tidemark.toml`
    ///
    /// A default config file is written if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the config is
    /// invalid, or the watermark file is corrupt.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let config_path = dir.join(CONFIG_FILE_NAME);
        TidemarkConfig::write_default_if_missing(&config_path)?;
        let config = TidemarkConfig::from_file(&config_path)?;

        Self::open_with_config(dir, config)
    }

    /// Open (or create) an environment with an explicit config
    ///
    /// The config file in `dir`, if any, is ignored.
    pub fn open_with_config(dir: impl AsRef<Path>, config: TidemarkConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(dir.join(SOURCES_DIR_NAME))?;

        let water_marks = Arc::new(SourceWaterMarksClock::open(
            dir.join(WATERMARKS_FILE_NAME),
            &config.sources,
        )?);

        let retentions: Arc<Mutex<RetentionMap>> = Arc::new(Mutex::new(HashMap::new()));
        let flush_shutdown = Arc::new(AtomicBool::new(false));
        let flush_handle = match config.durability_mode()? {
            DurabilityMode::Standard { interval_ms, .. } => Some(spawn_flush_thread(
                Arc::clone(&retentions),
                Arc::clone(&flush_shutdown),
                Duration::from_millis(interval_ms.max(1)),
            )?),
            DurabilityMode::Always | DurabilityMode::Cache => None,
        };

        tracing::info!(
            target: "tidemark::environment",
            dir = %dir.display(),
            durability = %config.durability,
            store = %config.store,
            "Environment opened"
        );

        Ok(Environment {
            dir,
            config,
            water_marks,
            writers: Mutex::new(HashMap::new()),
            retentions,
            flush_shutdown,
            flush_handle: Mutex::new(flush_handle),
        })
    }

    /// Writer for `source`, created and reconciled on first use
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed source name, or any error
    /// from opening the source's store and retention log.
    pub fn writer(&self, source: &str) -> Result<Arc<ByteWriter>> {
        validate_source_name(source)?;

        let mut writers = self.writers.lock();
        if let Some(writer) = writers.get(source) {
            return Ok(Arc::clone(writer));
        }

        let source_dir = self.source_dir(source);
        std::fs::create_dir_all(&source_dir)?;

        let store: Arc<dyn DataStore<Vec<u8>, Vec<u8>>> = match self.config.store_kind()? {
            StoreKind::File => Arc::new(FileStore::open(&source_dir)?),
            StoreKind::Memory => Arc::new(MemoryStore::<Vec<u8>, Vec<u8>>::new()),
        };
        let segment = Arc::new(SegmentRetention::<Vec<u8>>::open(
            &source_dir,
            self.config.durability_mode()?,
        )?);
        let retention: Arc<dyn Retention<Vec<u8>>> = segment.clone();
        let water_marks: Arc<dyn WaterMarksClock> = self.water_marks.clone();

        let writer = Arc::new(RetentionStoreWriter::new(
            source,
            retention,
            store,
            water_marks,
        )?);
        writers.insert(source.to_string(), Arc::clone(&writer));
        self.retentions.lock().insert(source.to_string(), segment);
        Ok(writer)
    }

    /// Retention log of `source`, if its writer has been opened
    pub fn retention(&self, source: &str) -> Option<Arc<SegmentRetention<Vec<u8>>>> {
        self.retentions.lock().get(source).cloned()
    }

    /// Flush every retention log, persist every store, then the registry
    ///
    /// # Errors
    ///
    /// Stops at the first failure; earlier sources stay checkpointed.
    pub fn checkpoint(&self) -> Result<()> {
        let writers: Vec<Arc<ByteWriter>> = self.writers.lock().values().cloned().collect();
        for writer in &writers {
            writer.retention().flush()?;
            writer.persist()?;
        }
        self.water_marks.flush()?;

        tracing::debug!(
            target: "tidemark::environment",
            writers = writers.len(),
            "Checkpoint complete"
        );
        Ok(())
    }

    /// Directory holding `source`'s store and retention log
    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.dir.join(SOURCES_DIR_NAME).join(source)
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configuration in effect
    pub fn config(&self) -> &TidemarkConfig {
        &self.config
    }

    /// The shared watermark registry
    pub fn water_marks(&self) -> &Arc<SourceWaterMarksClock> {
        &self.water_marks
    }
}

fn spawn_flush_thread(
    retentions: Arc<Mutex<RetentionMap>>,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("tidemark-retention-flush".to_string())
        .spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let logs: Vec<_> = retentions.lock().values().cloned().collect();
                for log in logs {
                    if let Err(e) = log.sync_if_overdue() {
                        tracing::warn!(
                            target: "tidemark::environment",
                            path = %log.path().display(),
                            error = %e,
                            "Background retention sync failed"
                        );
                    }
                }
            }
        })
        .map_err(|e| Error::storage(format!("failed to spawn retention flush thread: {}", e)))
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.flush_shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.flush_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .field("writers", &self.writers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_writes_default_config() {
        let dir = TempDir::new().unwrap();
        let env = Environment::open(dir.path()).unwrap();

        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        assert!(dir.path().join(SOURCES_DIR_NAME).is_dir());
        assert_eq!(env.config(), &TidemarkConfig::default());
    }

    #[test]
    fn test_writer_is_shared_per_source() {
        let dir = TempDir::new().unwrap();
        let env = Environment::open(dir.path()).unwrap();

        let a = env.writer("orders").unwrap();
        let b = env.writer("orders").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = env.writer("payments").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.source(), "payments");
    }

    #[test]
    fn test_writer_rejects_bad_source_names() {
        let dir = TempDir::new().unwrap();
        let env = Environment::open(dir.path()).unwrap();

        assert!(env.writer("").is_err());
        assert!(env.writer("../escape").is_err());
        assert!(env.writer("..").is_err());
    }

    #[test]
    fn test_open_rejects_invalid_config_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "durability = \"turbo\"\n").unwrap();
        assert!(Environment::open(dir.path()).is_err());
    }

    #[test]
    fn test_flush_thread_syncs_idle_retention_log() {
        let dir = TempDir::new().unwrap();
        let config = TidemarkConfig {
            sync_interval_ms: 10,
            ..TidemarkConfig::default()
        };
        let env = Environment::open_with_config(dir.path(), config).unwrap();
        let orders = env.writer("orders").unwrap();
        orders.put(b"a".to_vec(), b"1".to_vec(), 1).unwrap();

        let log = env.retention("orders").unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while log.unsynced_appends() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(log.unsynced_appends(), 0);
        assert!(env.retention("payments").is_none());
    }

    #[test]
    fn test_no_flush_thread_outside_standard_mode() {
        let dir = TempDir::new().unwrap();
        let config = TidemarkConfig {
            durability: "always".to_string(),
            ..TidemarkConfig::default()
        };
        let env = Environment::open_with_config(dir.path(), config).unwrap();
        assert!(env.flush_handle.lock().is_none());

        let standard_dir = TempDir::new().unwrap();
        let env = Environment::open(standard_dir.path()).unwrap();
        assert!(env.flush_handle.lock().is_some());
    }

    #[test]
    fn test_configured_sources_take_slots_in_order() {
        let dir = TempDir::new().unwrap();
        let config = TidemarkConfig {
            sources: vec!["b".to_string(), "a".to_string()],
            ..TidemarkConfig::default()
        };
        let env = Environment::open_with_config(dir.path(), config).unwrap();

        env.writer("c").unwrap();
        assert_eq!(env.water_marks().slot_of("b"), Some(0));
        assert_eq!(env.water_marks().slot_of("a"), Some(1));
        assert_eq!(env.water_marks().slot_of("c"), Some(2));
    }
}
