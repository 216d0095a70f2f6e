//! Data-plane FETCH, end to end: one peer publishes, another searches
//! the registry and pulls the file straight from the owner.

use cairn_services::{fetch, FetchOutcome};

use crate::*;

/// Deterministic test payload large enough to need many read chunks.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn fetch_end_to_end_is_byte_identical() {
    let registry = spawn_registry(5).await;

    let original = payload(100_000);
    let mut owner_peer = TestPeer::start(registry.addr, 1, "xfer-owner").await;
    owner_peer.share("x.bin", &original);
    owner_peer.client.join().await.expect("join");
    owner_peer.publish_shared().await;
    fence(&mut owner_peer.client).await;

    let mut fetcher = TestPeer::start(registry.addr, 2, "xfer-fetcher").await;
    let owner = fetcher
        .client
        .search("x.bin")
        .await
        .expect("search")
        .expect("x.bin should resolve");
    assert_eq!(owner.port, owner_peer.data_port);

    match fetch(owner, "x.bin", &fetcher.downloads).await.expect("fetch") {
        FetchOutcome::Fetched { path, bytes } => {
            assert_eq!(bytes, original.len() as u64);
            let copied = std::fs::read(&path).expect("read fetched file");
            assert_eq!(copied, original, "fetched bytes must match the source");
        }
        FetchOutcome::NotFound => panic!("owner should have the file"),
    }

    owner_peer.cleanup();
    fetcher.cleanup();
}

#[tokio::test]
async fn fetch_reports_missing_file_via_status_byte() {
    let registry = spawn_registry(5).await;

    // publish a file, then delete it from disk before anyone fetches
    let mut owner_peer = TestPeer::start(registry.addr, 1, "ghost-owner").await;
    owner_peer.share("ghost.txt", b"soon deleted");
    owner_peer.client.join().await.expect("join");
    owner_peer.publish_shared().await;
    fence(&mut owner_peer.client).await;
    std::fs::remove_file(owner_peer.shared.join("ghost.txt")).expect("delete shared file");

    let mut fetcher = TestPeer::start(registry.addr, 2, "ghost-fetcher").await;
    let owner = fetcher
        .client
        .search("ghost.txt")
        .await
        .expect("search")
        .expect("stale index entry should still resolve");

    match fetch(owner, "ghost.txt", &fetcher.downloads).await.expect("fetch") {
        FetchOutcome::NotFound => {}
        FetchOutcome::Fetched { .. } => panic!("deleted file cannot be served"),
    }
    assert!(
        !fetcher.downloads.join("ghost.txt").exists(),
        "a miss must not leave an output file behind"
    );

    owner_peer.cleanup();
    fetcher.cleanup();
}

#[tokio::test]
async fn fetch_handles_empty_files() {
    let registry = spawn_registry(5).await;

    let mut owner_peer = TestPeer::start(registry.addr, 1, "empty-owner").await;
    owner_peer.share("empty.dat", b"");
    owner_peer.client.join().await.expect("join");
    owner_peer.publish_shared().await;
    fence(&mut owner_peer.client).await;

    let mut fetcher = TestPeer::start(registry.addr, 2, "empty-fetcher").await;
    let owner = fetcher
        .client
        .search("empty.dat")
        .await
        .expect("search")
        .expect("empty.dat should resolve");

    match fetch(owner, "empty.dat", &fetcher.downloads).await.expect("fetch") {
        FetchOutcome::Fetched { path, bytes } => {
            assert_eq!(bytes, 0);
            assert_eq!(std::fs::read(&path).expect("read").len(), 0);
        }
        FetchOutcome::NotFound => panic!("owner should have the file"),
    }

    owner_peer.cleanup();
    fetcher.cleanup();
}
