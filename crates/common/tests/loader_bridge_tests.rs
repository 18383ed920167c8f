//! Loader Bridge Integration Tests
//!
//! Tests for the async channel bridge between the Tokio front-end and the
//! gadget thread that owns the slots.
//!
//! # Test Scenarios
//! - Request/response flow for every loader command
//! - Worker draining from a polling thread
//! - Errors for invalid slots and a vanished worker
//!
//! Run with: `cargo test -p common --test loader_bridge_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, tag_image, with_timeout};
use common::{Error, LoaderWorker, SlotStore, create_loader_bridge};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Run a worker the way the gadget loop does: drain, then sleep a tick
fn spawn_polling_worker(
    worker: LoaderWorker,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<SlotStore> {
    thread::spawn(move || {
        let mut store = SlotStore::new();
        while !stop.load(Ordering::SeqCst) {
            worker.drain_into(&mut store);
            thread::sleep(Duration::from_millis(5));
        }
        worker.drain_into(&mut store);
        store
    })
}

// ============================================================================
// Command Flow Tests
// ============================================================================

#[tokio::test]
async fn test_import_dump_flow() {
    let (bridge, worker) = create_loader_bridge();
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_polling_worker(worker, stop.clone());

    let stored = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.import_dump(0, tag_image(512)))
        .await
        .expect("timed out")
        .expect("import failed");
    assert_eq!(stored, 512);

    let status = bridge.status().await.unwrap();
    assert!(status[0].present);
    assert!(status[0].loaded);
    assert_eq!(status[0].size, 512);
    assert!(!status[1].present);

    stop.store(true, Ordering::SeqCst);
    let store = handle.join().expect("worker panicked");
    assert_eq!(store.read_block(0, 1).unwrap()[0], 16);
}

#[tokio::test]
async fn test_set_then_present_then_absent() {
    let (bridge, worker) = create_loader_bridge();
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_polling_worker(worker, stop.clone());

    assert_eq!(bridge.set_slot_data(1, vec![0xAB; 2000]).await.unwrap(), 1024);
    let status = bridge.status().await.unwrap();
    assert!(status[1].loaded);
    assert!(!status[1].present);

    bridge.mark_present(1).await.unwrap();
    assert!(bridge.status().await.unwrap()[1].present);

    bridge.mark_absent(1).await.unwrap();
    let status = bridge.status().await.unwrap();
    assert!(!status[1].present);
    assert!(!status[1].loaded);
    assert_eq!(status[1].size, 1024);

    stop.store(true, Ordering::SeqCst);
    handle.join().expect("worker panicked");
}

#[tokio::test]
async fn test_invalid_slot_is_reported() {
    let (bridge, worker) = create_loader_bridge();
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_polling_worker(worker, stop.clone());

    let err = bridge.mark_present(2).await.unwrap_err();
    assert!(matches!(err, Error::Slot(_)));

    let err = bridge.import_dump(7, vec![1, 2, 3]).await.unwrap_err();
    assert!(err.to_string().contains("Invalid slot index 7"));

    stop.store(true, Ordering::SeqCst);
    handle.join().expect("worker panicked");
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_worker_dropped() {
    let (bridge, worker) = create_loader_bridge();
    drop(worker);

    let err = bridge.status().await.unwrap_err();
    assert!(matches!(err, Error::Channel(_)));
}

#[tokio::test]
async fn test_commands_queue_until_drained() {
    let (bridge, worker) = create_loader_bridge();

    // Queue without anyone draining yet
    let pending = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.mark_present(0).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!pending.is_finished());

    let mut store = SlotStore::new();
    let applied = tokio::task::spawn_blocking(move || {
        let n = worker.drain_into(&mut store);
        (n, store)
    })
    .await
    .unwrap();
    assert_eq!(applied.0, 1);
    assert_eq!(applied.1.presence_mask(), 0b01);

    pending.await.unwrap().unwrap();
}

#[test]
fn test_try_recv_on_empty_channel() {
    let (_bridge, worker) = create_loader_bridge();
    assert!(worker.try_recv_command().is_none());
}
