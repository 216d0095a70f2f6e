//! Failure containment: a misbehaving connection is closed and purged
//! without disturbing the registry or the peers that behave.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use cairn_core::wire;
use cairn_services::RegistrySettings;

use crate::*;

/// The registry signals rejection by closing the connection; the next
/// read sees EOF (or a reset, which counts the same).
async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
        Ok(Ok(0)) => {}
        Ok(Ok(n)) => panic!("expected close, read {n} bytes"),
        Ok(Err(_)) => {}
        Err(_) => panic!("connection not closed within 5s"),
    }
}

#[tokio::test]
async fn unknown_tag_closes_only_the_offender() {
    let registry = spawn_registry(5).await;

    let mut bystander = TestPeer::start(registry.addr, 1, "tag-bystander").await;
    bystander.share("safe.txt", b"safe");
    bystander.client.join().await.expect("join");
    bystander.publish_shared().await;
    fence(&mut bystander.client).await;

    let mut offender = TcpStream::connect(registry.addr).await.expect("connect");
    offender.write_all(&[0x7f]).await.expect("write bogus tag");
    expect_closed(&mut offender).await;

    // the registry keeps serving everyone else
    assert!(bystander
        .client
        .search("safe.txt")
        .await
        .expect("search")
        .is_some());
    assert_eq!(registry.table.len().await, 1);

    bystander.cleanup();
}

#[tokio::test]
async fn malformed_publish_closes_and_purges_the_sender() {
    let registry = spawn_registry(5).await;

    let mut bystander = TestPeer::start(registry.addr, 1, "malformed-bystander").await;
    bystander.client.join().await.expect("join");
    fence(&mut bystander.client).await;

    // a valid JOIN, then a PUBLISH declaring more files than allowed
    let mut raw = TcpStream::connect(registry.addr).await.expect("connect");
    raw.write_all(&wire::encode_join(2)).await.expect("join");
    raw.write_all(&[0x01]).await.expect("publish tag");
    raw.write_all(&(MAX_FILES + 1).to_be_bytes())
        .await
        .expect("bad count");
    expect_closed(&mut raw).await;

    // the offender's session goes with its connection; the bystander stays
    wait_for_len(&registry.table, 1).await;
    fence(&mut bystander.client).await;

    bystander.cleanup();
}

#[tokio::test]
async fn unterminated_filename_is_rejected() {
    let registry = spawn_registry(5).await;

    // SEARCH whose name never ends: 101 bytes and no NUL in sight
    let mut raw = TcpStream::connect(registry.addr).await.expect("connect");
    raw.write_all(&[0x02]).await.expect("search tag");
    raw.write_all(&[b'a'; wire::MAX_FILENAME_LEN + 1])
        .await
        .expect("oversized name");
    expect_closed(&mut raw).await;

    assert_eq!(registry.table.len().await, 0);
}

#[tokio::test]
async fn stalled_message_body_times_out() {
    let settings = RegistrySettings {
        max_files_per_peer: MAX_FILES,
        read_timeout: Some(Duration::from_millis(200)),
    };
    let registry = spawn_registry_with(5, settings).await;

    // the tag commits the sender to a message body, then silence
    let mut stalled = TcpStream::connect(registry.addr).await.expect("connect");
    stalled.write_all(&[0x02]).await.expect("search tag");
    expect_closed(&mut stalled).await;

    // idle time between messages is not limited: a quiet but complete
    // peer outlives the stalled one
    let mut patient = TestPeer::start(registry.addr, 1, "patient").await;
    patient.client.join().await.expect("join");
    tokio::time::sleep(Duration::from_millis(400)).await;
    fence(&mut patient.client).await;
    assert_eq!(registry.table.len().await, 1);

    patient.cleanup();
}
