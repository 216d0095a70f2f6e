//! Registry server loop — accepts control connections and keeps the
//! session table current.
//!
//! One spawned task drives each connection through
//! Connected → (Joined) → dispatch loop → Closed. Whatever ends a
//! connection, its session entry is purged on the way out; nothing a
//! single peer does can take the server down.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use cairn_core::config::RegistryConfig;
use cairn_core::net::{self, DecodeError, NetError};
use cairn_core::wire::{Request, SearchResponse, WireError};

use crate::session::{ConnId, SessionError, SessionTable};

/// Tunables the server loop needs from configuration.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub max_files_per_peer: u32,

    /// Budget for one message body once its tag byte has arrived.
    /// `None` disables the timeout. Idle time between messages is
    /// always unlimited.
    pub read_timeout: Option<Duration>,
}

impl From<&RegistryConfig> for RegistrySettings {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            max_files_per_peer: config.max_files_per_peer,
            read_timeout: match config.read_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// The control-plane server.
pub struct RegistryServer {
    listener: TcpListener,
    table: SessionTable,
    settings: RegistrySettings,
}

impl RegistryServer {
    /// Bind the control-plane listener. IPv4 only.
    pub async fn bind(
        addr: SocketAddrV4,
        table: SessionTable,
        settings: RegistrySettings,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::V4(addr)).await?;
        Ok(Self {
            listener,
            table,
            settings,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. One task per connection; a connection's failure
    /// never reaches this loop.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let mut next_conn: ConnId = 0;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("registry shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    next_conn += 1;
                    let conn = next_conn;
                    let table = self.table.clone();
                    let settings = self.settings.clone();
                    tokio::spawn(async move {
                        handle_connection(conn, stream, peer_addr, table, settings).await;
                    });
                }
            }
        }
    }
}

/// Why a connection ended. Drives the close-side logging only.
enum ConnClose {
    Disconnected,
    Transport(std::io::Error),
    Malformed(WireError),
    TimedOut,
    Rejected(SessionError),
}

async fn handle_connection(
    conn: ConnId,
    stream: TcpStream,
    peer_addr: SocketAddr,
    table: SessionTable,
    settings: RegistrySettings,
) {
    let remote = match peer_addr {
        SocketAddr::V4(a) => a,
        SocketAddr::V6(_) => {
            tracing::warn!(%peer_addr, "rejecting non-IPv4 peer");
            return;
        }
    };
    tracing::debug!(conn, %peer_addr, "connection accepted");

    let (rd, wr) = stream.into_split();
    let reader = BufReader::new(rd);

    match drive(conn, reader, wr, remote, &table, &settings).await {
        ConnClose::Disconnected => tracing::debug!(conn, "peer disconnected"),
        ConnClose::Transport(e) => tracing::warn!(conn, error = %e, "connection i/o failed"),
        ConnClose::Malformed(e) => tracing::warn!(conn, error = %e, "malformed message, closing"),
        ConnClose::TimedOut => tracing::warn!(conn, "message body timed out, closing"),
        ConnClose::Rejected(e) => tracing::warn!(conn, error = %e, "request rejected, closing"),
    }

    if let Some(entry) = table.remove(conn).await {
        tracing::info!(
            conn,
            peer_id = entry.peer_id,
            files = entry.files.len(),
            "session removed"
        );
    }
}

/// The dispatch loop for one connection. Returns only to close it.
async fn drive(
    conn: ConnId,
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    remote: SocketAddrV4,
    table: &SessionTable,
    settings: &RegistrySettings,
) -> ConnClose {
    loop {
        // Waiting for the next tag byte is idle time and may last
        // forever; the body timeout starts once a tag commits the peer
        // to a message.
        let tag = match net::read_u8(&mut reader).await {
            Ok(b) => b,
            Err(NetError::Closed) => return ConnClose::Disconnected,
            Err(NetError::Io(e)) => return ConnClose::Transport(e),
        };

        let request = match read_body(&mut reader, tag, settings).await {
            Ok(r) => r,
            Err(BodyError::TimedOut) => return ConnClose::TimedOut,
            Err(BodyError::Decode(DecodeError::Net(NetError::Closed))) => {
                return ConnClose::Disconnected
            }
            Err(BodyError::Decode(DecodeError::Net(NetError::Io(e)))) => {
                return ConnClose::Transport(e)
            }
            Err(BodyError::Decode(DecodeError::Malformed(e))) => return ConnClose::Malformed(e),
        };

        match request {
            Request::Join { peer_id } => {
                match table.join(conn, peer_id, *remote.ip(), remote.port()).await {
                    Ok(()) => tracing::info!(conn, peer_id, addr = %remote, "peer joined"),
                    Err(e) => return ConnClose::Rejected(e),
                }
            }

            Request::Publish { files } => {
                let count = files.len();
                match table.publish(conn, files).await {
                    Ok(()) => tracing::info!(conn, files = count, "file list published"),
                    Err(e) => return ConnClose::Rejected(e),
                }
            }

            Request::Search { name } => {
                let response = match table.lookup(&name).await {
                    Some(owner) => {
                        tracing::info!(conn, name = %name, peer_id = owner.peer_id, "search hit");
                        SearchResponse::found(owner.peer_id, owner.addr, owner.port)
                    }
                    None => {
                        tracing::info!(conn, name = %name, "search miss");
                        SearchResponse::not_found()
                    }
                };
                if let Err(e) = writer.write_all(&response.to_wire()).await {
                    return ConnClose::Transport(e);
                }
            }
        }
    }
}

enum BodyError {
    TimedOut,
    Decode(DecodeError),
}

async fn read_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    tag: u8,
    settings: &RegistrySettings,
) -> Result<Request, BodyError> {
    let body = net::read_request_body(reader, tag, settings.max_files_per_peer);
    let result = match settings.read_timeout {
        Some(limit) => match tokio::time::timeout(limit, body).await {
            Ok(r) => r,
            Err(_) => return Err(BodyError::TimedOut),
        },
        None => body.await,
    };
    result.map_err(BodyError::Decode)
}
