//! Writer admission, reconciliation and checkpoint properties
//!
//! Each test drives a `RetentionStoreWriter` over in-memory collaborators
//! unless the property is about what reaches disk.

use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;
use tidemark_core::{Clock, DataStore, Event, Occurred, Retention, WaterMarksClock};
use tidemark_durability::{MemoryRetention, SourceWaterMarksClock};
use tidemark_engine::RetentionStoreWriter;
use tidemark_storage::{FileStore, MemoryStore};

type Store = MemoryStore<String, String>;
type Log = MemoryRetention<String>;
type Writer = RetentionStoreWriter<String, String, Store, Log>;

const SOURCE: &str = "orders";

struct Harness {
    writer: Writer,
    store: Arc<Store>,
    log: Arc<Log>,
    marks: Arc<SourceWaterMarksClock>,
}

fn harness_with(marks: Arc<SourceWaterMarksClock>, log: Arc<Log>) -> Harness {
    let store = Arc::new(Store::new());
    let writer = RetentionStoreWriter::new(SOURCE, log.clone(), store.clone(), marks.clone())
        .unwrap();
    Harness {
        writer,
        store,
        log,
        marks,
    }
}

fn harness() -> Harness {
    let marks = Arc::new(SourceWaterMarksClock::in_memory(["other", SOURCE]).unwrap());
    harness_with(marks, Arc::new(Log::new()))
}

/// The source's position in the shared clock
fn live_hwm(marks: &SourceWaterMarksClock) -> u64 {
    marks.water_mark(SOURCE, &marks.current())
}

fn kv(i: u64) -> (String, String) {
    (format!("key:{}", i), format!("value:{}", i))
}

// ============================================================================
// Idempotency
// ============================================================================

#[test]
fn test_writes_below_hwm_are_rejected_without_side_effects() {
    let h = harness();
    for scn in [10, 20, 30] {
        let (k, v) = kv(scn);
        assert!(h.writer.put(k, v, scn).unwrap());
    }
    let store_before = h.store.snapshot();
    let log_before = h.log.len();

    for _ in 0..3 {
        for scn in [0, 10, 20, 29] {
            assert!(!h.writer.put("dup".into(), "x".into(), scn).unwrap());
            assert!(!h.writer.delete("key:10".into(), scn).unwrap());
        }
    }

    assert_eq!(h.store.snapshot(), store_before);
    assert_eq!(h.log.len(), log_before);
    assert_eq!(h.writer.hw_mark(), 30);
    assert_eq!(live_hwm(&h.marks), 30);
}

// ============================================================================
// Boundary
// ============================================================================

#[test]
fn test_write_at_hwm_accepted_with_current_clock() {
    let h = harness();
    h.writer.put("a".into(), "1".into(), 40).unwrap();

    // Another source moves the shared clock between the two writes
    h.marks.update_hw_mark("other", 7).unwrap();
    let snapshot = h.marks.current();

    assert!(h.writer.put("b".into(), "2".into(), 40).unwrap());
    assert_eq!(h.writer.hw_mark(), 40);
    assert_eq!(live_hwm(&h.marks), 40);

    let events = h.log.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].clock(), &snapshot);
    assert_eq!(events[1].clock(), &Clock::new(vec![7, 40]));
}

#[test]
fn test_first_write_at_zero_is_accepted() {
    let h = harness();
    assert!(h.writer.put("a".into(), "1".into(), 0).unwrap());
    assert_eq!(h.writer.hw_mark(), 0);
    assert_eq!(h.log.len(), 1);
}

// ============================================================================
// Causal ordering
// ============================================================================

#[test]
fn test_event_clocks_never_regress() {
    let h = harness();
    let mut scn = 0;
    for step in [1, 3, 0, 2, 5, 0, 1] {
        scn += step;
        let (k, v) = kv(scn);
        h.writer.put(k, v, scn).unwrap();
        if scn % 2 == 0 {
            h.marks.update_hw_mark("other", scn).unwrap();
        }
    }

    let events = h.log.events();
    for pair in events.windows(2) {
        let order = pair[0].clock().compare(pair[1].clock());
        assert!(
            matches!(order, Occurred::Before | Occurred::Equicurrent),
            "clock regressed: {} then {}",
            pair[0].clock(),
            pair[1].clock()
        );
    }
}

#[test]
fn test_events_since_returns_newer_events() {
    let h = harness();
    for scn in 1..=5 {
        let (k, v) = kv(scn);
        h.writer.put(k, v, scn).unwrap();
    }
    let seen = h.log.events()[2].clock().clone();

    let newer = h.log.events_since(&seen, 10).unwrap();
    let keys: Vec<&str> = newer.iter().map(|e| e.key().as_str()).collect();
    assert_eq!(keys, vec!["key:4", "key:5"]);
}

// ============================================================================
// Reconciliation
// ============================================================================

#[test]
fn test_reconciliation_takes_log_when_behind_registry() {
    let marks = Arc::new(SourceWaterMarksClock::in_memory([SOURCE]).unwrap());
    marks.update_water_marks(SOURCE, 90, 100).unwrap();

    let log = Arc::new(Log::new());
    log.append(Event::new("k".to_string(), Clock::new(vec![80])))
        .unwrap();

    let h = harness_with(marks, log);
    assert_eq!(h.writer.hw_mark(), 80);
    assert!(h.writer.lw_mark() <= 80);
    assert_eq!(h.marks.high_water_mark(SOURCE), 80);
    assert_eq!(h.marks.low_water_mark(SOURCE), h.writer.lw_mark());

    // The gap between 80 and 100 is redelivered and admitted
    assert!(h.writer.put("k".into(), "again".into(), 81).unwrap());
}

#[test]
fn test_reconciliation_keeps_registry_when_log_ahead() {
    let marks = Arc::new(SourceWaterMarksClock::in_memory([SOURCE]).unwrap());
    marks.update_water_marks(SOURCE, 10, 50).unwrap();

    let log = Arc::new(Log::new());
    log.append(Event::new("k".to_string(), Clock::new(vec![70])))
        .unwrap();

    let h = harness_with(marks, log);
    assert_eq!(h.writer.hw_mark(), 50);
    assert_eq!(h.writer.lw_mark(), 10);
}

#[test]
fn test_reconciliation_ignores_log_for_unrecorded_source() {
    let marks = Arc::new(SourceWaterMarksClock::in_memory([SOURCE]).unwrap());
    let log = Arc::new(Log::new());
    log.append(Event::new("k".to_string(), Clock::new(vec![33])))
        .unwrap();

    let h = harness_with(marks, log);
    assert_eq!(h.writer.hw_mark(), 0);
    assert_eq!(h.writer.lw_mark(), 0);
    assert!(h.marks.has_source(SOURCE));
}

#[test]
fn test_reconciliation_with_empty_log_resets_to_zero() {
    let marks = Arc::new(SourceWaterMarksClock::in_memory([SOURCE]).unwrap());
    marks.update_water_marks(SOURCE, 5, 25).unwrap();

    let h = harness_with(marks, Arc::new(Log::new()));
    assert_eq!(h.writer.hw_mark(), 0);
    assert_eq!(h.writer.lw_mark(), 0);
}

// ============================================================================
// Checkpointing
// ============================================================================

#[test]
fn test_persist_makes_store_and_registry_durable() {
    let dir = TempDir::new().unwrap();
    let marks_path = dir.path().join("watermarks.scn");
    let store_dir = dir.path().join("store");
    std::fs::create_dir_all(&store_dir).unwrap();

    {
        let marks = Arc::new(SourceWaterMarksClock::open(&marks_path, [SOURCE]).unwrap());
        let store = Arc::new(FileStore::open(&store_dir).unwrap());
        let log = Arc::new(MemoryRetention::<Vec<u8>>::new());
        let writer = RetentionStoreWriter::new(SOURCE, log, store, marks).unwrap();

        for scn in (10..=50).step_by(10) {
            writer
                .put(format!("k{}", scn).into_bytes(), vec![scn as u8], scn)
                .unwrap();
        }
        writer.delete(b"k10".to_vec(), 50).unwrap();
        writer.persist().unwrap();
    }

    let marks = SourceWaterMarksClock::open(&marks_path, [SOURCE]).unwrap();
    assert!(marks.has_source(SOURCE));
    assert_eq!(marks.high_water_mark(SOURCE), 50);

    let store = FileStore::open(&store_dir).unwrap();
    assert_eq!(store.len(), 4);
    assert_eq!(store.get(&b"k10".to_vec()).unwrap(), None);
    assert_eq!(store.get(&b"k50".to_vec()).unwrap(), Some(vec![50]));
}

#[test]
fn test_sync_publishes_hwm_without_durable_flush() {
    let h = harness();
    h.writer.put("a".into(), "1".into(), 12).unwrap();
    h.writer.sync().unwrap();

    assert_eq!(h.store.sync_count(), 1);
    assert_eq!(h.store.persist_count(), 0);
    assert!(h.store.persisted().is_empty());
    assert_eq!(h.marks.high_water_mark(SOURCE), 12);
}

#[test]
fn test_checkpoint_never_moves_lwm() {
    let marks = Arc::new(SourceWaterMarksClock::in_memory([SOURCE]).unwrap());
    marks.update_water_marks(SOURCE, 3, 3).unwrap();
    let log = Arc::new(Log::new());
    log.append(Event::new("k".to_string(), Clock::new(vec![3])))
        .unwrap();
    let h = harness_with(marks, log);

    h.writer.put("a".into(), "1".into(), 30).unwrap();
    h.writer.persist().unwrap();

    assert_eq!(h.writer.lw_mark(), 3);
    assert_eq!(h.marks.low_water_mark(SOURCE), 3);
}

// ============================================================================
// Administrative override
// ============================================================================

#[test]
fn test_save_hw_mark_fast_forwards_only() {
    let h = harness();
    h.writer.put("a".into(), "1".into(), 50).unwrap();

    h.writer.save_hw_mark(60).unwrap();
    assert_eq!(h.writer.hw_mark(), 60);
    assert_eq!(h.marks.high_water_mark(SOURCE), 60);
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.log.len(), 1);

    h.writer.save_hw_mark(40).unwrap();
    assert_eq!(h.writer.hw_mark(), 60);
    assert_eq!(h.marks.high_water_mark(SOURCE), 60);

    assert!(!h.writer.put("b".into(), "2".into(), 55).unwrap());
}

// ============================================================================
// Monotonicity (property)
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Put(u64),
    Delete(u64),
    Save(u64),
    Sync,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u64..200).prop_map(Op::Put),
        2 => (0u64..200).prop_map(Op::Delete),
        1 => (0u64..200).prop_map(Op::Save),
        1 => Just(Op::Sync),
    ]
}

proptest! {
    #[test]
    fn prop_hwm_monotone_and_admission_exact(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let h = harness();
        let mut appended = 0;

        for op in ops {
            let before = h.writer.hw_mark();
            match op {
                Op::Put(scn) => {
                    let admitted = h.writer.put(format!("k{}", scn % 7), "v".into(), scn).unwrap();
                    prop_assert_eq!(admitted, scn >= before);
                    if admitted {
                        appended += 1;
                    }
                }
                Op::Delete(scn) => {
                    let admitted = h.writer.delete(format!("k{}", scn % 7), scn).unwrap();
                    prop_assert_eq!(admitted, scn >= before);
                    if admitted {
                        appended += 1;
                    }
                }
                Op::Save(scn) => h.writer.save_hw_mark(scn).unwrap(),
                Op::Sync => h.writer.sync().unwrap(),
            }

            let after = h.writer.hw_mark();
            prop_assert!(after >= before);
            prop_assert!(h.writer.lw_mark() <= after);
            prop_assert_eq!(live_hwm(&h.marks), after);
            prop_assert!(h.marks.high_water_mark(SOURCE) <= after);
        }

        prop_assert_eq!(h.log.len(), appended);
    }
}
