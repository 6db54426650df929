//! Durability mode configuration
//!
//! Controls how eagerly a retention log fsyncs (Cache, Standard, Always).

/// Durability mode for retention log appends
///
/// # Modes
///
/// | Mode | fsync | Data Loss Window |
/// |------|-------|-----------------|
/// | Cache | Never (no file) | Everything |
/// | Always | Every append | Zero |
/// | Standard | Every N appends or T ms | Up to batch/interval |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// In-memory only; nothing survives a restart
    ///
    /// Use case: tests, caches, ephemeral pipelines.
    Cache,

    /// fsync after every append (slow, maximum durability)
    Always,

    /// fsync every `batch_size` appends or every `interval_ms` (the default)
    ///
    /// Appends check both bounds; an idle log relies on a flush thread
    /// calling `SegmentRetention::sync_if_overdue` for the time bound.
    ///
    /// A crash may lose the unsynced tail. Restart reconciliation treats the
    /// lost tail as never admitted, so the caller redelivers it.
    Standard {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum appends between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Check if this mode writes a log file at all
    pub fn requires_file(&self) -> bool {
        !matches!(self, DurabilityMode::Cache)
    }

    /// Check if this mode fsyncs on every append
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Cache => "Cache (fastest, nothing survives restart)",
            DurabilityMode::Always => "Always sync (safest, slowest)",
            DurabilityMode::Standard { .. } => "Standard (balanced speed/safety)",
        }
    }

    /// Standard mode with 100ms interval and 1000-append batches
    pub fn standard_default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        Self::standard_default()
    }
}
