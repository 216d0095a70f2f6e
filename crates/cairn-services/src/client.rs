//! The peer's control-plane connection to the registry.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpSocket;

use cairn_core::net::{self, NetError};
use cairn_core::wire::{self, FileOwner, WireError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to reach registry: {0}")]
    Connect(std::io::Error),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error("invalid request: {0}")]
    Invalid(#[from] WireError),
}

/// Control-plane client.
///
/// The local socket is bound to the same port the data-plane listener
/// uses (both carry SO_REUSEADDR and SO_REUSEPORT), because the
/// endpoint the registry hands out to other peers is whatever it
/// observes on this connection. Without the shared port, FETCH would
/// dial an ephemeral port nobody listens on.
pub struct RegistryClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer_id: u32,
}

impl RegistryClient {
    /// Connect to the registry, binding locally to `local_port`.
    pub async fn connect(
        registry: SocketAddr,
        local_port: u16,
        peer_id: u32,
    ) -> Result<Self, ClientError> {
        let socket = TcpSocket::new_v4().map_err(ClientError::Connect)?;
        socket.set_reuseaddr(true).map_err(ClientError::Connect)?;
        socket.set_reuseport(true).map_err(ClientError::Connect)?;
        socket
            .bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, local_port)))
            .map_err(ClientError::Connect)?;
        let stream = socket.connect(registry).await.map_err(ClientError::Connect)?;
        let (rd, wr) = stream.into_split();
        tracing::debug!(%registry, local_port, peer_id, "registry connection established");
        Ok(Self {
            reader: BufReader::new(rd),
            writer: wr,
            peer_id,
        })
    }

    pub fn peer_id(&self) -> u32 {
        self.peer_id
    }

    /// Send JOIN. The registry does not acknowledge; a rejection shows
    /// up as a closed connection on the next operation.
    pub async fn join(&mut self) -> Result<(), ClientError> {
        let msg = wire::encode_join(self.peer_id);
        self.writer.write_all(&msg).await.map_err(NetError::Io)?;
        Ok(())
    }

    /// Send the full file list, replacing whatever the registry held.
    pub async fn publish(&mut self, files: &[String], max_files: u32) -> Result<(), ClientError> {
        let msg = wire::encode_publish(files, max_files)?;
        self.writer.write_all(&msg).await.map_err(NetError::Io)?;
        Ok(())
    }

    /// SEARCH. `None` is the registry's all-zero "not indexed" answer,
    /// a normal outcome rather than an error.
    pub async fn search(&mut self, name: &str) -> Result<Option<FileOwner>, ClientError> {
        let msg = wire::encode_search(name)?;
        self.writer.write_all(&msg).await.map_err(NetError::Io)?;
        let response = net::read_search_response(&mut self.reader).await?;
        Ok(response.owner())
    }
}
