//! Connection I/O — bounded stream reads shared by registry and peers.
//!
//! Send-side is tokio's `write_all`, a full-buffer loop over partial
//! writes. Receive-side adds what the protocol needs on top of
//! `read_exact`: a clean distinction between "remote closed" and
//! "transport failed", and a bounded read-until-NUL that leaves any
//! bytes after the terminator buffered for the next read on the same
//! connection.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use crate::wire::{self, Request, SearchResponse, Tag, WireError, MAX_FILENAME_LEN};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The remote closed the connection before or inside a message.
    #[error("connection closed by remote")]
    Closed,

    #[error("connection i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while decoding a message off a stream. `Malformed` is a
/// protocol violation by the remote; `Net` is the transport giving out.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Malformed(#[from] WireError),
}

// ── Primitive reads ───────────────────────────────────────────────────────────

/// Fill `buf` completely or fail. A short read caused by the remote
/// closing maps to [`NetError::Closed`].
pub async fn read_exact<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> Result<(), NetError> {
    match r.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(NetError::Closed),
        Err(e) => Err(NetError::Io(e)),
    }
}

pub async fn read_u8<R: AsyncRead + Unpin>(r: &mut R) -> Result<u8, NetError> {
    let mut buf = [0u8; 1];
    read_exact(r, &mut buf).await?;
    Ok(buf[0])
}

pub async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32, NetError> {
    let mut buf = [0u8; 4];
    read_exact(r, &mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

/// Read bytes up to a NUL terminator, returning the bytes before it and
/// consuming nothing past it. More than `cap` bytes without a NUL is a
/// framing violation, not a truncation.
pub async fn read_cstr<R: AsyncBufRead + Unpin>(
    r: &mut R,
    cap: usize,
) -> Result<Vec<u8>, DecodeError> {
    let mut out: Vec<u8> = Vec::new();
    loop {
        let chunk = r.fill_buf().await.map_err(NetError::from)?;
        if chunk.is_empty() {
            return Err(NetError::Closed.into());
        }
        if let Some(pos) = chunk.iter().position(|&b| b == 0) {
            if out.len() + pos > cap {
                return Err(WireError::MissingTerminator.into());
            }
            out.extend_from_slice(&chunk[..pos]);
            r.consume(pos + 1);
            return Ok(out);
        }
        let taken = chunk.len();
        if out.len() + taken > cap {
            return Err(WireError::MissingTerminator.into());
        }
        out.extend_from_slice(chunk);
        r.consume(taken);
    }
}

// ── Message reads ─────────────────────────────────────────────────────────────

/// Decode the body of a control-plane request whose tag byte has
/// already been read. FETCH is a data-plane tag and is rejected here.
pub async fn read_request_body<R: AsyncBufRead + Unpin>(
    r: &mut R,
    tag: u8,
    max_files: u32,
) -> Result<Request, DecodeError> {
    match Tag::try_from(tag)? {
        Tag::Join => {
            let peer_id = read_u32(r).await?;
            Ok(Request::Join { peer_id })
        }
        Tag::Publish => {
            let count = read_u32(r).await?;
            if count == 0 || count > max_files {
                return Err(WireError::BadFileCount {
                    count,
                    max: max_files,
                }
                .into());
            }
            let mut files = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let raw = read_cstr(r, MAX_FILENAME_LEN).await?;
                files.push(wire::filename_from_wire(raw)?);
            }
            Ok(Request::Publish { files })
        }
        Tag::Search => {
            let raw = read_cstr(r, MAX_FILENAME_LEN).await?;
            Ok(Request::Search {
                name: wire::filename_from_wire(raw)?,
            })
        }
        Tag::Fetch => Err(WireError::UnexpectedTag(tag).into()),
    }
}

/// Read one complete FETCH request off a data-plane connection.
pub async fn read_fetch_request<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<String, DecodeError> {
    let tag = read_u8(r).await?;
    if Tag::try_from(tag)? != Tag::Fetch {
        return Err(WireError::UnexpectedTag(tag).into());
    }
    let raw = read_cstr(r, MAX_FILENAME_LEN).await?;
    Ok(wire::filename_from_wire(raw)?)
}

/// Read the registry's fixed 10-byte SEARCH response.
pub async fn read_search_response<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<SearchResponse, NetError> {
    let mut buf = [0u8; SearchResponse::WIRE_SIZE];
    read_exact(r, &mut buf).await?;
    Ok(SearchResponse::from_wire(buf))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
