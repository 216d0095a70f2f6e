//! Cairn integration test harness.
//!
//! Everything runs in-process over 127.0.0.1: a registry server task,
//! registry clients, and data-plane file servers, wired the same way
//! the binaries wire them. Ports are OS-assigned so tests can run in
//! parallel.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;

use cairn_services::{
    FileLibrary, FileServer, RegistryClient, RegistryServer, RegistrySettings, SessionTable,
};

mod failures;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Registry limits used across tests unless a test needs its own.
pub const MAX_FILES: u32 = 10;

pub fn settings() -> RegistrySettings {
    RegistrySettings {
        max_files_per_peer: MAX_FILES,
        read_timeout: Some(Duration::from_secs(5)),
    }
}

/// A running in-process registry.
///
/// Dropping the shutdown sender stops the server, so keep the handle
/// alive for the duration of the test.
pub struct TestRegistry {
    pub addr: SocketAddr,
    pub table: SessionTable,
    _shutdown: broadcast::Sender<()>,
}

/// Spawn a registry on an OS-assigned port.
pub async fn spawn_registry(max_peers: usize) -> TestRegistry {
    spawn_registry_with(max_peers, settings()).await
}

pub async fn spawn_registry_with(max_peers: usize, settings: RegistrySettings) -> TestRegistry {
    let table = SessionTable::new(max_peers);
    let server = RegistryServer::bind(
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        table.clone(),
        settings,
    )
    .await
    .expect("bind registry");
    let addr = server.local_addr().expect("registry local addr");
    let (shutdown, _) = broadcast::channel(1);
    tokio::spawn(server.run(shutdown.subscribe()));
    TestRegistry {
        addr,
        table,
        _shutdown: shutdown,
    }
}

/// A unique scratch dir for one test.
pub fn tmp_dir(label: &str) -> PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "cairn-test-{}-{label}-{n}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// One test peer: a shared dir, a data-plane file server, and a control
/// client bound to the same local port, exactly as the peer binary
/// assembles them.
pub struct TestPeer {
    pub client: RegistryClient,
    pub data_port: u16,
    pub shared: PathBuf,
    pub downloads: PathBuf,
    _shutdown: broadcast::Sender<()>,
}

impl TestPeer {
    pub async fn start(registry: SocketAddr, peer_id: u32, label: &str) -> TestPeer {
        let shared = tmp_dir(&format!("{label}-shared"));
        let downloads = tmp_dir(&format!("{label}-downloads"));
        let library = FileLibrary::new(&shared);
        let server = FileServer::bind(0, library).await.expect("bind file server");
        let data_port = server.local_port().expect("file server port");
        let (shutdown, _) = broadcast::channel(1);
        tokio::spawn(server.run(shutdown.subscribe()));
        let client = RegistryClient::connect(registry, data_port, peer_id)
            .await
            .expect("connect to registry");
        TestPeer {
            client,
            data_port,
            shared,
            downloads,
            _shutdown: shutdown,
        }
    }

    /// Drop a file into the shared dir.
    pub fn share(&self, name: &str, contents: &[u8]) {
        std::fs::write(self.shared.join(name), contents).expect("write shared file");
    }

    /// Publish the shared dir's current contents.
    pub async fn publish_shared(&mut self) {
        let names = FileLibrary::new(&self.shared).scan().expect("scan shared dir");
        self.client
            .publish(&names, MAX_FILES)
            .await
            .expect("publish");
    }

    pub fn cleanup(&self) {
        let _ = std::fs::remove_dir_all(&self.shared);
        let _ = std::fs::remove_dir_all(&self.downloads);
    }
}

/// Requests on one connection are answered in order, so a SEARCH
/// round-trip guarantees every earlier message on this connection has
/// been applied to the table.
pub async fn fence(client: &mut RegistryClient) {
    let _ = client
        .search("fence-probe")
        .await
        .expect("fence search should round-trip");
}

/// Poll until the table settles at `expected` live sessions, for purges
/// the server applies after this test observed the connection close.
pub async fn wait_for_len(table: &SessionTable, expected: usize) {
    for _ in 0..200 {
        if table.len().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("table never settled at {expected} sessions");
}

/// Poll until `name` stops resolving, for effects (like a disconnect
/// purge) that another connection observes asynchronously.
pub async fn wait_for_miss(client: &mut RegistryClient, name: &str) {
    for _ in 0..200 {
        if client
            .search(name)
            .await
            .expect("search during wait")
            .is_none()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("'{name}' still resolves after waiting");
}
