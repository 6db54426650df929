//! Shared watermark registry and causal clock
//!
//! `SourceWaterMarksClock` is the process-wide authority that every
//! retention store writer shares. It keeps one slot per source holding two
//! things:
//!
//! - the published `(lwm, hwm)` pair, moved only by `set_hw_mark`,
//!   `set_lw_mark` and `update_water_marks`. This is what
//!   `low_water_mark`/`high_water_mark` report and what reaches disk.
//! - the live clock position, moved by `update_hw_mark` on every admitted
//!   write. The shared clock is the vector of all live positions.
//!
//! A writer publishes only after its store has been flushed, so the file
//! never claims progress a source's store could still lose, whichever
//! source triggers the file write.
//!
//! # Slot Order
//!
//! Slots are assigned once and never move: sources loaded from the
//! watermark file keep their recorded position, configured sources not yet
//! in the file follow, and sources first seen at runtime are appended.
//!
//! # Concurrency
//!
//! Slot state lives behind one `parking_lot::RwLock`; HWM advance and clock
//! construction happen under the same write lock so the returned clock
//! always contains the advance. File writes are serialized by a separate
//! mutex so a later snapshot is never overwritten by an earlier one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tidemark_core::{Clock, Error, Result, Scn, WaterMarksClock};

use crate::format::{read_water_marks, write_water_marks, WaterMarkEntry};

#[derive(Debug, Default)]
struct Slots {
    /// Published pairs, in slot order
    entries: Vec<WaterMarkEntry>,
    /// Live clock positions, parallel to `entries`
    live: Vec<Scn>,
    index: HashMap<String, usize>,
}

impl Slots {
    fn slot(&self, source: &str) -> Option<&WaterMarkEntry> {
        self.index.get(source).map(|&i| &self.entries[i])
    }

    fn push(&mut self, entry: WaterMarkEntry) -> usize {
        let i = self.entries.len();
        self.index.insert(entry.source.clone(), i);
        self.live.push(entry.hwm);
        self.entries.push(entry);
        i
    }

    fn slot_index(&mut self, source: &str) -> Result<usize> {
        match self.index.get(source) {
            Some(&i) => Ok(i),
            None => {
                validate_source(source)?;
                Ok(self.push(WaterMarkEntry::unrecorded(source)))
            }
        }
    }

    fn clock(&self) -> Clock {
        Clock::new(self.live.clone())
    }
}

fn validate_source(source: &str) -> Result<()> {
    if source.is_empty() {
        return Err(Error::invalid_input("source name must not be empty"));
    }
    if source.len() > u16::MAX as usize {
        return Err(Error::invalid_input(format!(
            "source name is {} bytes, limit is {}",
            source.len(),
            u16::MAX
        )));
    }
    Ok(())
}

/// Watermark registry backed by an optional watermark file
#[derive(Debug)]
pub struct SourceWaterMarksClock {
    slots: RwLock<Slots>,
    path: Option<PathBuf>,
    file_lock: Mutex<()>,
}

impl SourceWaterMarksClock {
    /// Create a registry that never touches disk
    ///
    /// `sync_water_marks` and `flush` are no-ops.
    pub fn in_memory<I, S>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(Vec::new(), sources, None)
    }

    /// Open a registry persisted at `path`
    ///
    /// Recorded sources keep their slots; configured sources missing from
    /// the file are appended in the given order.
    pub fn open<I, S>(path: impl AsRef<Path>, sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = path.as_ref().to_path_buf();
        let loaded = read_water_marks(&path)?.unwrap_or_default();
        Self::build(loaded, sources, Some(path))
    }

    fn build<I, S>(loaded: Vec<WaterMarkEntry>, sources: I, path: Option<PathBuf>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut slots = Slots::default();
        for entry in loaded {
            if slots.index.contains_key(&entry.source) {
                return Err(Error::corruption(format!(
                    "source '{}' recorded twice in watermark file",
                    entry.source
                )));
            }
            slots.push(entry);
        }
        for source in sources {
            slots.slot_index(source.as_ref())?;
        }

        tracing::info!(
            target: "tidemark::watermarks",
            sources = slots.entries.len(),
            recorded = slots.entries.iter().filter(|e| e.recorded).count(),
            path = ?path,
            "Watermark registry opened"
        );

        Ok(SourceWaterMarksClock {
            slots: RwLock::new(slots),
            path,
            file_lock: Mutex::new(()),
        })
    }

    /// Path of the watermark file, `None` for an in-memory registry
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Source names in slot order
    pub fn sources(&self) -> Vec<String> {
        self.slots
            .read()
            .entries
            .iter()
            .map(|e| e.source.clone())
            .collect()
    }

    /// Slot index of a source in every clock this registry produces
    pub fn slot_of(&self, source: &str) -> Option<usize> {
        self.slots.read().index.get(source).copied()
    }

    fn write_file(&self) -> Result<()> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(()),
        };

        let _guard = self.file_lock.lock();
        let entries = self.slots.read().entries.clone();
        write_water_marks(path, &entries)?;
        Ok(())
    }
}

impl WaterMarksClock for SourceWaterMarksClock {
    fn has_source(&self, source: &str) -> bool {
        self.slots
            .read()
            .slot(source)
            .map(|e| e.recorded)
            .unwrap_or(false)
    }

    fn low_water_mark(&self, source: &str) -> Scn {
        self.slots.read().slot(source).map(|e| e.lwm).unwrap_or(0)
    }

    fn high_water_mark(&self, source: &str) -> Scn {
        self.slots.read().slot(source).map(|e| e.hwm).unwrap_or(0)
    }

    fn water_mark(&self, source: &str, clock: &Clock) -> Scn {
        self.slots
            .read()
            .index
            .get(source)
            .map(|&i| clock.get(i))
            .unwrap_or(0)
    }

    fn update_water_marks(&self, source: &str, lwm: Scn, hwm: Scn) -> Result<()> {
        let mut slots = self.slots.write();
        let i = slots.slot_index(source)?;
        let entry = &mut slots.entries[i];
        entry.hwm = hwm;
        entry.lwm = lwm.min(hwm);
        entry.recorded = true;
        slots.live[i] = hwm;
        Ok(())
    }

    fn current(&self) -> Clock {
        self.slots.read().clock()
    }

    fn update_hw_mark(&self, source: &str, hwm: Scn) -> Result<Clock> {
        let mut slots = self.slots.write();
        let i = slots.slot_index(source)?;
        slots.live[i] = slots.live[i].max(hwm);
        Ok(slots.clock())
    }

    fn set_hw_mark(&self, source: &str, hwm: Scn) -> Result<()> {
        let mut slots = self.slots.write();
        let i = slots.slot_index(source)?;
        let entry = &mut slots.entries[i];
        entry.hwm = entry.hwm.max(hwm);
        entry.recorded = true;
        slots.live[i] = slots.live[i].max(hwm);
        Ok(())
    }

    fn set_lw_mark(&self, source: &str, lwm: Scn) -> Result<()> {
        let mut slots = self.slots.write();
        let i = slots.slot_index(source)?;
        let entry = &mut slots.entries[i];
        entry.lwm = entry.lwm.max(lwm.min(entry.hwm));
        entry.recorded = true;
        Ok(())
    }

    fn sync_water_marks(&self, source: &str) -> Result<()> {
        tracing::debug!(
            target: "tidemark::watermarks",
            source,
            hwm = self.high_water_mark(source),
            "Syncing watermark record"
        );
        self.write_file()
    }

    fn flush(&self) -> Result<()> {
        self.write_file()
    }
}
