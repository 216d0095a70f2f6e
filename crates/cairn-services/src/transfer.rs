//! Data-plane FETCH — serving files to other peers and fetching from
//! them. The registry never sees these bytes.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::broadcast;

use cairn_core::net::{self, DecodeError, NetError};
use cairn_core::wire::{self, FetchStatus, FileOwner, WireError};

use crate::library::FileLibrary;

/// Chunk size for streaming file bytes in both directions.
const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("could not connect to peer at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid fetch request: {0}")]
    Invalid(#[from] WireError),

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// How a completed fetch ended. A peer that no longer has the file is
/// a protocol outcome, not an error.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched { path: PathBuf, bytes: u64 },
    NotFound,
}

// ── Serving side ──────────────────────────────────────────────────────────────

/// Accepts inbound FETCH connections and streams files out of the
/// library. Must listen on the same port the control connection is
/// bound to, since that is the endpoint the registry hands out.
pub struct FileServer {
    listener: TcpListener,
    library: FileLibrary,
}

impl FileServer {
    /// Bind the data-plane listener with SO_REUSEADDR + SO_REUSEPORT so
    /// the control socket can share the port. 0 = OS-assigned.
    pub async fn bind(port: u16, library: FileLibrary) -> std::io::Result<Self> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.set_reuseport(true)?;
        socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
        let listener = socket.listen(16)?;
        Ok(Self { listener, library })
    }

    pub fn local_port(&self) -> std::io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accept loop. One task per transfer; the interactive loop keeps
    /// running while transfers are served.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("file server shutting down");
                    return;
                }

                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let library = self.library.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_fetch(stream, &library).await {
                            tracing::warn!(%peer_addr, error = %e, "fetch request failed");
                        }
                    });
                }
            }
        }
    }
}

/// Answer one inbound FETCH: status byte, then the raw file bytes, then
/// close. Closing the connection is the end-of-file signal; there is no
/// length prefix.
async fn serve_fetch(stream: TcpStream, library: &FileLibrary) -> Result<(), FetchError> {
    let (rd, mut writer) = stream.into_split();
    let mut reader = BufReader::new(rd);

    let name = net::read_fetch_request(&mut reader).await?;

    let mut file = match library.open(&name).await {
        Ok(Some(file)) => file,
        Ok(None) => {
            tracing::info!(name = %name, "fetch miss");
            writer
                .write_all(&[u8::from(FetchStatus::NotFound)])
                .await
                .map_err(NetError::Io)?;
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(name = %name, error = %e, "shared file unreadable, reporting miss");
            writer
                .write_all(&[u8::from(FetchStatus::NotFound)])
                .await
                .map_err(NetError::Io)?;
            return Ok(());
        }
    };

    writer
        .write_all(&[u8::from(FetchStatus::Found)])
        .await
        .map_err(NetError::Io)?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = file.read(&mut buf).await.map_err(NetError::Io)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await.map_err(NetError::Io)?;
        sent += n as u64;
    }
    writer.shutdown().await.map_err(NetError::Io)?;
    tracing::info!(name = %name, bytes = sent, "file served");
    Ok(())
}

// ── Fetching side ─────────────────────────────────────────────────────────────

/// Fetch `name` from `owner` over a fresh data-plane connection,
/// writing it under `dest_dir`. The transfer has no declared length;
/// it is read in fixed-size chunks until the remote closes.
pub async fn fetch(owner: FileOwner, name: &str, dest_dir: &Path) -> Result<FetchOutcome, FetchError> {
    let request = wire::encode_fetch(name)?;

    let addr = owner.endpoint();
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| FetchError::Connect { addr, source })?;
    let (mut rd, mut writer) = stream.into_split();

    writer.write_all(&request).await.map_err(NetError::Io)?;

    let status = FetchStatus::from(net::read_u8(&mut rd).await?);
    if status == FetchStatus::NotFound {
        return Ok(FetchOutcome::NotFound);
    }

    if let Err(e) = tokio::fs::create_dir_all(dest_dir).await {
        return Err(FetchError::Write {
            path: dest_dir.to_path_buf(),
            source: e,
        });
    }
    let path = dest_dir.join(name);
    let mut out = tokio::fs::File::create(&path)
        .await
        .map_err(|source| FetchError::Write {
            path: path.clone(),
            source,
        })?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = rd.read(&mut buf).await.map_err(NetError::Io)?;
        if n == 0 {
            break; // sender closed: transfer complete
        }
        out.write_all(&buf[..n])
            .await
            .map_err(|source| FetchError::Write {
                path: path.clone(),
                source,
            })?;
        total += n as u64;
    }
    out.flush().await.map_err(|source| FetchError::Write {
        path: path.clone(),
        source,
    })?;

    tracing::info!(name = %name, bytes = total, peer_id = owner.peer_id, "file fetched");
    Ok(FetchOutcome::Fetched { path, bytes: total })
}
