//! TLS pool checkout discipline: exclusive leases per slot.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tapproxy::{SlotRole, TlsContextPool};

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn pool_with_server_slots(slots: usize) -> (TlsContextPool, Vec<tempfile::NamedTempFile>) {
    let pool = TlsContextPool::new(0, slots);
    let mut keep_alive = Vec::new();
    for index in 0..slots {
        let signed = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = write_temp(&signed.cert.pem());
        let key = write_temp(&signed.key_pair.serialize_pem());
        pool.add_cert(SlotRole::Server, index, cert.path(), key.path())
            .unwrap();
        keep_alive.push(cert);
        keep_alive.push(key);
    }
    (pool, keep_alive)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkout_of_one_slot_serializes() {
    let (pool, _files) = pool_with_server_slots(1);
    let pool = Arc::new(pool);

    let first = pool.checkout(SlotRole::Server, 0).await.unwrap();

    let acquired = Arc::new(AtomicUsize::new(0));
    let second = {
        let pool = Arc::clone(&pool);
        let acquired = Arc::clone(&acquired);
        tokio::spawn(async move {
            let lease = pool.checkout(SlotRole::Server, 0).await.unwrap();
            acquired.store(1, Ordering::SeqCst);
            lease.release();
        })
    };

    // The second caller must wait while the first lease is live
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(acquired.load(Ordering::SeqCst), 0);

    first.release();
    tokio::time::timeout(Duration::from_secs(2), second)
        .await
        .expect("second checkout never completed")
        .unwrap();
    assert_eq!(acquired.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_two_callers_hold_one_slot_at_once() {
    let (pool, _files) = pool_with_server_slots(1);
    let pool = Arc::new(pool);

    let holders = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        let holders = Arc::clone(&holders);
        let max_seen = Arc::clone(&max_seen);
        tasks.push(tokio::spawn(async move {
            let lease = pool.checkout(SlotRole::Server, 0).await.unwrap();
            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            holders.fetch_sub(1, Ordering::SeqCst);
            lease.release();
        }));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("checkout starved")
            .unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_slots_do_not_block_each_other() {
    let (pool, _files) = pool_with_server_slots(2);

    let first = pool.checkout(SlotRole::Server, 0).await.unwrap();

    // Slot 1 is independent and must be available while slot 0 is leased
    let second = tokio::time::timeout(Duration::from_secs(1), pool.checkout(SlotRole::Server, 1))
        .await
        .expect("independent slot was blocked")
        .unwrap();

    assert_eq!(first.index(), 0);
    assert_eq!(second.index(), 1);
    assert!(first.server_config().is_some());
    assert!(second.server_config().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lease_exposes_built_config_for_its_role_only() {
    let (pool, _files) = pool_with_server_slots(1);

    let lease = pool.checkout(SlotRole::Server, 0).await.unwrap();
    assert_eq!(lease.role(), SlotRole::Server);
    assert!(lease.server_config().is_some());
    assert!(lease.client_config().is_none());
}
