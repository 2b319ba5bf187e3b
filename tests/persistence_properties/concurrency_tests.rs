//! Lock discipline between persist and restore.

use crate::test_utils::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_persist_and_restore_of_different_calls_overlap() {
    init_tracing();
    let store = MemoryStore::new();
    {
        let intf = interfaces(60000);
        let table = Arc::new(CallTable::new());
        let p = open(&store, StorageMode::MultiKey, &table, &intf);
        let b = register(&table, rich_call(&intf, "call-b", 60000, 2));
        assert!(p.persist(&b).is_written());
    }

    let intf = interfaces(60000);
    let table = Arc::new(CallTable::new());
    let p = Arc::new(open(&store, StorageMode::MultiKey, &table, &intf));
    let a = register(&table, rich_call(&intf, "call-a", 60100, 2));
    store.set_latency(Duration::from_millis(1));

    let barrier = Arc::new(Barrier::new(2));
    let restorer = {
        let p = Arc::clone(&p);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            p.restore_one(&CallId::new("call-b"), CallType::Own).map(|_| ())
        })
    };
    let persister = {
        let p = Arc::clone(&p);
        let a = Arc::clone(&a);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            (0..5).all(|_| p.persist(&a).is_written())
        })
    };

    assert!(restorer.join().unwrap().is_ok());
    assert!(persister.join().unwrap());
    store.set_latency(Duration::ZERO);

    // the call being persisted stays readable for relay logic
    let reader = a.state().read();
    let second = a.state().read();
    assert_eq!(reader.num_streams(), second.num_streams());
    drop((reader, second));
    assert_eq!(table.lookup(&CallId::new("call-b")).unwrap().state().read().num_streams(), 4);
}

#[test]
fn test_concurrent_persists_of_one_call_serialize() {
    let store = MemoryStore::new();
    let intf = interfaces(60200);
    let table = Arc::new(CallTable::new());
    let p = Arc::new(open(&store, StorageMode::MultiKey, &table, &intf));
    let handle = register(&table, rich_call(&intf, "same", 60200, 2));

    let barrier = Arc::new(Barrier::new(4));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let p = Arc::clone(&p);
            let handle = Arc::clone(&handle);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..25).filter(|_| p.persist(&handle).is_written()).count()
            })
        })
        .collect();
    let written: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert_eq!(written, 100);

    let after_race = store.dump(0);
    assert!(p.persist(&handle).is_written());
    assert_eq!(store.dump(0), after_race);
}

#[test]
fn test_mutation_waits_for_persist_then_lands() {
    let store = MemoryStore::new();
    let intf = interfaces(60300);
    let table = Arc::new(CallTable::new());
    let p = Arc::new(open(&store, StorageMode::MultiKey, &table, &intf));
    let handle = register(&table, rich_call(&intf, "mut", 60300, 1));
    store.set_latency(Duration::from_millis(1));

    let persister = {
        let p = Arc::clone(&p);
        let handle = Arc::clone(&handle);
        thread::spawn(move || p.persist(&handle).is_written())
    };
    thread::sleep(Duration::from_millis(5));
    handle.state().write().tos = 0;
    assert!(persister.join().unwrap());
    store.set_latency(Duration::ZERO);

    assert!(p.persist(&handle).is_written());
    assert_eq!(store.hash(0, "call-mut").unwrap()["tos"], b"0".to_vec());
}
