//! Retention store writer
//!
//! Admits SCN-numbered mutations for one source, applies them to a store,
//! and records each admitted change as a causally ordered event in a
//! retention log, while keeping the source's watermarks in the shared
//! registry consistent with what was admitted.
//!
//! ## Write Sequence
//!
//! ```text
//! 1. scn < hwm            → stale, return Ok(false), no side effects
//! 2. store.put / delete   → apply mutation
//! 3. derive event clock   → scn == hwm: registry.current()
//!                           scn >  hwm: registry.update_hw_mark(source, scn)
//! 4. retention.append     → (key, clock)
//! 5. hwm = scn            → return Ok(true)
//! ```
//!
//! Store, log and registry fail independently and there is no rollback.
//! A failure after step 2 leaves the store ahead of the log; a failure
//! after step 4 leaves the log ahead of `hwm`. Both are resolved on the
//! next construction, which takes the minimum of the registry HWM and the
//! HWM derivable from the log, so the caller redelivers from there and the
//! admission rule absorbs any duplicates.
//!
//! ## Locking
//!
//! `write`, `sync`, `persist` and `save_hw_mark` run under one mutex per
//! writer. `lw_mark` and `hw_mark` read atomics without the lock and may
//! observe a value mid-update; they are meant for monitoring.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tidemark_core::{
    DataStore, Event, Mutation, Result, Retention, Scn, WaterMarksClock,
};

/// Single-source writer over a store, a retention log and a shared registry
///
/// Exactly one writer may be authoritative for a source at a time; this is
/// not checked. Dropping a writer does not flush anything; call `sync` or
/// `persist` first.
pub struct RetentionStoreWriter<K, V, S: ?Sized, R: ?Sized> {
    source: String,
    store: Arc<S>,
    retention: Arc<R>,
    water_marks: Arc<dyn WaterMarksClock>,

    /// Low watermark as reconciled at construction
    lwm: Scn,

    /// High watermark; written only under `write_lock`
    hwm: AtomicU64,

    /// Serializes write, sync, persist and save_hw_mark
    write_lock: Mutex<()>,

    _marker: PhantomData<fn(K, V)>,
}

impl<K, V, S, R> RetentionStoreWriter<K, V, S, R>
where
    K: Clone,
    S: DataStore<K, V> + ?Sized,
    R: Retention<K> + ?Sized,
{
    /// Create a writer and reconcile its watermarks
    ///
    /// Starts from the registry's recorded pair. If the registry has an
    /// entry for the source, the HWM is lowered to what the retention log's
    /// max clock says was logged, and the LWM is clamped to the HWM. The
    /// result is written back to the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry rejects the source.
    pub fn new(
        source: impl Into<String>,
        retention: Arc<R>,
        store: Arc<S>,
        water_marks: Arc<dyn WaterMarksClock>,
    ) -> Result<Self> {
        let source = source.into();

        let mut hwm = water_marks.high_water_mark(&source);
        let mut lwm = water_marks.low_water_mark(&source);

        if water_marks.has_source(&source) {
            let max_clock = retention.max_clock();
            let logged = water_marks.water_mark(&source, &max_clock);
            if logged < hwm {
                tracing::info!(
                    target: "tidemark::writer",
                    source = %source,
                    recorded_hwm = hwm,
                    logged_hwm = logged,
                    "Retention log behind recorded watermark, resuming from log"
                );
            }
            hwm = hwm.min(logged);
            lwm = lwm.min(hwm);
        }

        water_marks.update_water_marks(&source, lwm, hwm)?;

        tracing::info!(
            target: "tidemark::writer",
            source = %source,
            lwm,
            hwm,
            "Writer resuming since[lwm hwm]"
        );

        Ok(RetentionStoreWriter {
            source,
            store,
            retention,
            water_marks,
            lwm,
            hwm: AtomicU64::new(hwm),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    /// Admit a put or delete at `scn`
    ///
    /// Returns `Ok(false)` without side effects when `scn` is below the
    /// high watermark, `Ok(true)` once the store, log and watermark have
    /// all been updated.
    ///
    /// # Errors
    ///
    /// Store, retention and registry errors propagate unchanged; the
    /// outcome for `scn` is then unknown and the write may be retried at
    /// the same or a later SCN.
    pub fn write(&self, key: K, mutation: Mutation<V>, scn: Scn) -> Result<bool> {
        let _guard = self.write_lock.lock();

        let hwm = self.hwm.load(Ordering::SeqCst);
        if scn < hwm {
            tracing::debug!(
                target: "tidemark::writer",
                source = %self.source,
                scn,
                hwm,
                op = mutation.kind(),
                "Rejected stale write"
            );
            return Ok(false);
        }

        match mutation {
            Mutation::Put(value) => self.store.put(key.clone(), value)?,
            Mutation::Delete => {
                self.store.delete(&key)?;
            }
        }

        let clock = if scn == hwm {
            self.water_marks.current()
        } else {
            self.water_marks.update_hw_mark(&self.source, scn)?
        };

        self.retention.append(Event::new(key, clock))?;
        self.hwm.store(scn, Ordering::SeqCst);

        Ok(true)
    }

    /// Admit a put at `scn`; see [`write`](Self::write)
    pub fn put(&self, key: K, value: V, scn: Scn) -> Result<bool> {
        self.write(key, Mutation::Put(value), scn)
    }

    /// Admit a delete at `scn`; see [`write`](Self::write)
    pub fn delete(&self, key: K, scn: Scn) -> Result<bool> {
        self.write(key, Mutation::Delete, scn)
    }

    /// Flush the store and publish the HWM to the registry's record
    ///
    /// # Errors
    ///
    /// Returns the first store or registry error.
    pub fn sync(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.store.sync()?;
        self.publish()
    }

    /// Durably flush the store and publish the HWM to the registry's record
    ///
    /// # Errors
    ///
    /// Returns the first store or registry error.
    pub fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.store.persist()?;
        self.publish()
    }

    fn publish(&self) -> Result<()> {
        let hwm = self.hwm.load(Ordering::SeqCst);
        self.water_marks.set_hw_mark(&self.source, hwm)?;
        self.water_marks.sync_water_marks(&self.source)?;
        tracing::debug!(
            target: "tidemark::writer",
            source = %self.source,
            hwm,
            "Checkpointed watermark"
        );
        Ok(())
    }

    /// Fast-forward the HWM past changes applied through another path
    ///
    /// No-op unless `hwm` is above the current HWM. Touches neither the
    /// store nor the retention log.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry rejects the update.
    pub fn save_hw_mark(&self, hwm: Scn) -> Result<()> {
        let _guard = self.write_lock.lock();
        if hwm > self.hwm.load(Ordering::SeqCst) {
            self.hwm.store(hwm, Ordering::SeqCst);
            self.water_marks.set_hw_mark(&self.source, hwm)?;
        }
        Ok(())
    }
}

impl<K, V, S: ?Sized, R: ?Sized> RetentionStoreWriter<K, V, S, R> {
    /// Source this writer admits changes for
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Low watermark (lock-free read)
    pub fn lw_mark(&self) -> Scn {
        self.lwm
    }

    /// High watermark (lock-free read)
    pub fn hw_mark(&self) -> Scn {
        self.hwm.load(Ordering::SeqCst)
    }

    /// The store this writer mutates
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The retention log this writer appends to
    pub fn retention(&self) -> &Arc<R> {
        &self.retention
    }

    /// The shared watermark registry
    pub fn water_marks(&self) -> &Arc<dyn WaterMarksClock> {
        &self.water_marks
    }
}

impl<K, V, S: ?Sized, R: ?Sized> std::fmt::Debug for RetentionStoreWriter<K, V, S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionStoreWriter")
            .field("source", &self.source)
            .field("lwm", &self.lwm)
            .field("hwm", &self.hw_mark())
            .finish()
    }
}
