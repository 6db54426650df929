//! Multi-threaded writer tests
//!
//! Concurrent writes on one writer are serialized by its lock; writers for
//! different sources share one registry.

use std::sync::{Arc, Barrier};
use std::thread;

use tidemark_core::{Occurred, Retention, WaterMarksClock};
use tidemark_durability::{MemoryRetention, SourceWaterMarksClock};
use tidemark_engine::RetentionStoreWriter;
use tidemark_storage::MemoryStore;

type Writer = RetentionStoreWriter<
    String,
    u64,
    MemoryStore<String, u64>,
    MemoryRetention<String>,
>;

fn writer(source: &str, marks: &Arc<SourceWaterMarksClock>) -> Arc<Writer> {
    Arc::new(
        RetentionStoreWriter::new(
            source,
            Arc::new(MemoryRetention::new()),
            Arc::new(MemoryStore::new()),
            marks.clone(),
        )
        .unwrap(),
    )
}

/// Test: SCNs 10..=20 race on one writer; HWM ends at 20 and the log holds
/// exactly the admitted writes in admission order
#[test]
fn test_concurrent_writes_admit_monotone_subset() {
    let marks = Arc::new(SourceWaterMarksClock::in_memory(["orders"]).unwrap());
    let w = writer("orders", &marks);

    let scns: Vec<u64> = (10..=20).collect();
    let barrier = Arc::new(Barrier::new(scns.len()));

    let handles: Vec<_> = scns
        .iter()
        .map(|&scn| {
            let w = Arc::clone(&w);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let admitted = w.put(format!("key:{}", scn), scn, scn).unwrap();
                (scn, admitted)
            })
        })
        .collect();

    let results: Vec<(u64, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let admitted: Vec<u64> = results
        .iter()
        .filter(|(_, ok)| *ok)
        .map(|(scn, _)| *scn)
        .collect();

    assert_eq!(w.hw_mark(), 20);
    assert_eq!(marks.current().get(0), 20);
    assert!(admitted.contains(&20));
    assert_eq!(w.store().len(), admitted.len());

    // Log order is admission order, so logged SCNs strictly increase
    let events = w.retention().events();
    assert_eq!(events.len(), admitted.len());
    let logged: Vec<u64> = events.iter().map(|e| e.clock().get(0)).collect();
    assert!(logged.windows(2).all(|p| p[0] < p[1]), "logged {:?}", logged);

    let mut expected = admitted.clone();
    expected.sort_unstable();
    assert_eq!(logged, expected);
}

/// Test: hw_mark readers never observe a regression while writes run
#[test]
fn test_lock_free_reads_never_regress() {
    let marks = Arc::new(SourceWaterMarksClock::in_memory(["orders"]).unwrap());
    let w = writer("orders", &marks);
    let barrier = Arc::new(Barrier::new(2));

    let writer_thread = {
        let w = Arc::clone(&w);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for scn in 1..=2000u64 {
                w.put("hot".to_string(), scn, scn).unwrap();
            }
        })
    };

    let reader_thread = {
        let w = Arc::clone(&w);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let mut last = 0;
            for _ in 0..5000 {
                let now = w.hw_mark();
                assert!(now >= last, "hw_mark went from {} to {}", last, now);
                assert!(w.lw_mark() <= now);
                last = now;
            }
        })
    };

    writer_thread.join().unwrap();
    reader_thread.join().unwrap();
    assert_eq!(w.hw_mark(), 2000);
}

/// Test: writers for different sources share the registry clock
#[test]
fn test_sources_share_causal_clock() {
    let sources = ["a", "b", "c", "d"];
    let marks = Arc::new(SourceWaterMarksClock::in_memory(sources).unwrap());
    let writers: Vec<_> = sources.iter().map(|s| writer(s, &marks)).collect();
    let barrier = Arc::new(Barrier::new(writers.len()));

    let handles: Vec<_> = writers
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let w = Arc::clone(w);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for scn in 1..=100u64 {
                    w.put(format!("{}:{}", i, scn), scn, scn * (i as u64 + 1))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let clock = marks.current();
    assert_eq!(clock.values(), &[100, 200, 300, 400]);

    for w in &writers {
        let events = w.retention().events();
        assert_eq!(events.len(), 100);
        for pair in events.windows(2) {
            assert!(matches!(
                pair[0].clock().compare(pair[1].clock()),
                Occurred::Before | Occurred::Equicurrent
            ));
        }
        assert!(w.retention().max_clock().before_eq(&clock));
    }
}
