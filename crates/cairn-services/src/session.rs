//! Registry session table — the live directory of joined peers.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use cairn_core::wire::FileOwner;

/// Identifies one live control connection. Allocated by the accept
/// loop, never reused while the process runs.
pub type ConnId = u64;

/// One joined peer, keyed by its control connection.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Opaque identifier the peer chose at JOIN.
    pub peer_id: u32,

    /// Remote endpoint of the control connection. FETCH dials this, so
    /// the peer keeps its data-plane listener on the same port.
    pub addr: Ipv4Addr,
    pub port: u16,

    /// Published filenames, replaced wholesale on each PUBLISH.
    pub files: Vec<String>,

    pub joined_at: Instant,

    /// Sequence number of this peer's latest PUBLISH. Resolves
    /// same-name collisions toward the most recent publisher.
    last_publish: u64,
}

/// Rejections a table operation can produce. All of them are fatal to
/// the connection that triggered them, never to the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session table full ({max} peers)")]
    CapacityExceeded { max: usize },

    #[error("peer id {peer_id} is already registered")]
    DuplicateNotAllowed { peer_id: u32 },

    #[error("connection never joined")]
    UnknownPeer,
}

/// The session table. Clones share one underlying table; every
/// operation takes the single exclusive lock, so check-then-insert
/// sequences cannot interleave across connection tasks.
#[derive(Clone)]
pub struct SessionTable {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    max_peers: usize,
    peers: HashMap<ConnId, PeerEntry>,
    /// filename → owning connection; the most recent publisher wins.
    /// Every entry here names a file its owner currently publishes.
    by_name: HashMap<String, ConnId>,
    publish_seq: u64,
}

impl Inner {
    /// Point `name` at whichever remaining peer published it most
    /// recently, or drop it when nobody does.
    fn reindex(&mut self, name: &str) {
        let winner = self
            .peers
            .iter()
            .filter(|(_, p)| p.files.iter().any(|f| f == name))
            .max_by_key(|(_, p)| p.last_publish)
            .map(|(conn, _)| *conn);
        match winner {
            Some(conn) => {
                self.by_name.insert(name.to_string(), conn);
            }
            None => {
                self.by_name.remove(name);
            }
        }
    }
}

impl SessionTable {
    pub fn new(max_peers: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                max_peers,
                peers: HashMap::new(),
                by_name: HashMap::new(),
                publish_seq: 0,
            })),
        }
    }

    /// Register a joined peer. A repeated JOIN with the same id on the
    /// same connection is a no-op; anything else claiming a live id, or
    /// a connection changing its id, is rejected.
    pub async fn join(
        &self,
        conn: ConnId,
        peer_id: u32,
        addr: Ipv4Addr,
        port: u16,
    ) -> Result<(), SessionError> {
        let mut t = self.inner.lock().await;
        if let Some(existing) = t.peers.get(&conn) {
            if existing.peer_id == peer_id {
                return Ok(());
            }
            return Err(SessionError::DuplicateNotAllowed { peer_id });
        }
        if t.peers.values().any(|p| p.peer_id == peer_id) {
            return Err(SessionError::DuplicateNotAllowed { peer_id });
        }
        if t.peers.len() >= t.max_peers {
            return Err(SessionError::CapacityExceeded { max: t.max_peers });
        }
        t.peers.insert(
            conn,
            PeerEntry {
                peer_id,
                addr,
                port,
                files: Vec::new(),
                joined_at: Instant::now(),
                last_publish: 0,
            },
        );
        Ok(())
    }

    /// Replace the peer's published list. Names the peer stops offering
    /// fall back to their most recent remaining publisher.
    pub async fn publish(&self, conn: ConnId, files: Vec<String>) -> Result<(), SessionError> {
        let mut t = self.inner.lock().await;
        let seq = t.publish_seq + 1;
        let old_files = match t.peers.get_mut(&conn) {
            Some(entry) => {
                entry.last_publish = seq;
                std::mem::replace(&mut entry.files, files.clone())
            }
            None => return Err(SessionError::UnknownPeer),
        };
        t.publish_seq = seq;
        for name in &files {
            t.by_name.insert(name.clone(), conn);
        }
        for name in old_files {
            if !files.iter().any(|f| f == &name) && t.by_name.get(&name) == Some(&conn) {
                t.reindex(&name);
            }
        }
        Ok(())
    }

    /// Resolve a filename to its current owner, from table state at the
    /// instant of the call.
    pub async fn lookup(&self, name: &str) -> Option<FileOwner> {
        let t = self.inner.lock().await;
        let conn = t.by_name.get(name)?;
        let p = t.peers.get(conn)?;
        Some(FileOwner {
            peer_id: p.peer_id,
            addr: p.addr,
            port: p.port,
        })
    }

    /// Drop a connection's entry and everything indexed under it.
    /// Safe to call for connections that never joined.
    pub async fn remove(&self, conn: ConnId) -> Option<PeerEntry> {
        let mut t = self.inner.lock().await;
        let entry = t.peers.remove(&conn)?;
        for name in &entry.files {
            if t.by_name.get(name) == Some(&conn) {
                t.reindex(name);
            }
        }
        Some(entry)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.peers.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
