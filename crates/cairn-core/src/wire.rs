//! Cairn wire format — on-wire shapes for registry and peer traffic.
//!
//! These layouts ARE the protocol. Every multi-byte integer is big-endian
//! and every filename travels as a NUL-terminated string. There is no
//! generic length-prefixed envelope: each message's boundary must be
//! inferable from its tag byte alone, so changing anything here is a
//! breaking change.

use std::net::{Ipv4Addr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Tags ──────────────────────────────────────────────────────────────────────

/// The single byte that opens every request.
///
/// JOIN/PUBLISH/SEARCH travel on the control plane (peer → registry);
/// FETCH travels on the data plane (peer → peer). The registry closes
/// any connection that sends a tag it does not serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Join = 0x00,
    Publish = 0x01,
    Search = 0x02,
    Fetch = 0x03,
}

impl TryFrom<u8> for Tag {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Tag::Join),
            0x01 => Ok(Tag::Publish),
            0x02 => Ok(Tag::Search),
            0x03 => Ok(Tag::Fetch),
            other => Err(WireError::UnknownTag(other)),
        }
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> u8 {
        tag as u8
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Longest filename the protocol carries, excluding the NUL terminator.
pub const MAX_FILENAME_LEN: usize = 100;

/// Default cap on concurrently joined peers. A configuration default,
/// not a hard protocol limit.
pub const DEFAULT_MAX_PEERS: usize = 5;

/// Default cap on filenames per PUBLISH. Counts outside 1..=cap are
/// rejected as malformed by the receiver.
pub const DEFAULT_MAX_FILES_PER_PEER: u32 = 10;

// ── Search response ───────────────────────────────────────────────────────────

/// The registry's answer to SEARCH. Wire size: 10 bytes.
///
/// All-zero fields are the "not indexed" sentinel, a valid outcome and
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct SearchResponse {
    /// Identifier the owning peer chose at JOIN.
    pub peer_id: U32<BigEndian>,

    /// IPv4 octets of the owner's control connection.
    pub addr: [u8; 4],

    /// Port of the owner's control connection. The owner guarantees its
    /// data-plane listener is reachable on the same port.
    pub port: U16<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(SearchResponse, [u8; 10]);

impl SearchResponse {
    pub const WIRE_SIZE: usize = 10;

    /// The all-zero "not indexed" sentinel.
    pub fn not_found() -> Self {
        Self::new_zeroed()
    }

    pub fn found(peer_id: u32, addr: Ipv4Addr, port: u16) -> Self {
        Self {
            peer_id: U32::new(peer_id),
            addr: addr.octets(),
            port: U16::new(port),
        }
    }

    pub fn from_wire(bytes: [u8; Self::WIRE_SIZE]) -> Self {
        zerocopy::transmute!(bytes)
    }

    pub fn to_wire(&self) -> [u8; Self::WIRE_SIZE] {
        zerocopy::transmute!(*self)
    }

    /// Decode into a resolved owner; `None` for the sentinel.
    pub fn owner(&self) -> Option<FileOwner> {
        if self.peer_id.get() == 0 && self.addr == [0u8; 4] && self.port.get() == 0 {
            return None;
        }
        Some(FileOwner {
            peer_id: self.peer_id.get(),
            addr: Ipv4Addr::from(self.addr),
            port: self.port.get(),
        })
    }
}

/// A resolved file owner, as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOwner {
    pub peer_id: u32,
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl FileOwner {
    /// The endpoint FETCH dials.
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::from((self.addr, self.port))
    }
}

// ── Fetch status ──────────────────────────────────────────────────────────────

/// Status byte opening a FETCH response. Zero means the file follows,
/// streamed until the sender closes the connection; any nonzero byte
/// means the remote peer does not have the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Found,
    NotFound,
}

impl From<u8> for FetchStatus {
    fn from(byte: u8) -> Self {
        if byte == 0 {
            FetchStatus::Found
        } else {
            FetchStatus::NotFound
        }
    }
}

impl From<FetchStatus> for u8 {
    fn from(status: FetchStatus) -> u8 {
        match status {
            FetchStatus::Found => 0x00,
            FetchStatus::NotFound => 0x01,
        }
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// A decoded control-plane request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Join { peer_id: u32 },
    Publish { files: Vec<String> },
    Search { name: String },
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Violations of the framing rules. Fatal to the connection they arrive on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown tag byte: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("tag 0x{0:02x} is not valid on this connection")]
    UnexpectedTag(u8),

    #[error("filename not terminated within {} bytes", MAX_FILENAME_LEN + 1)]
    MissingTerminator,

    #[error("filename is empty")]
    EmptyFilename,

    #[error("filename is {0} bytes, limit is {}", MAX_FILENAME_LEN)]
    FilenameTooLong(usize),

    #[error("filename contains a NUL byte")]
    EmbeddedNul,

    #[error("filename contains a path separator")]
    PathSeparator,

    #[error("filename is not valid UTF-8")]
    InvalidUtf8,

    #[error("file count {count} outside 1..={max}")]
    BadFileCount { count: u32, max: u32 },
}

// ── Validation ────────────────────────────────────────────────────────────────

/// Validate a filename before it is encoded or resolved against a
/// directory: nonempty, at most [`MAX_FILENAME_LEN`] bytes, no NUL, no
/// path separators.
pub fn validate_filename(name: &str) -> Result<(), WireError> {
    if name.is_empty() {
        return Err(WireError::EmptyFilename);
    }
    if name.len() > MAX_FILENAME_LEN {
        return Err(WireError::FilenameTooLong(name.len()));
    }
    if name.bytes().any(|b| b == 0) {
        return Err(WireError::EmbeddedNul);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(WireError::PathSeparator);
    }
    Ok(())
}

/// Interpret the raw bytes of a NUL-terminated name read off the wire.
pub fn filename_from_wire(raw: Vec<u8>) -> Result<String, WireError> {
    let name = String::from_utf8(raw).map_err(|_| WireError::InvalidUtf8)?;
    validate_filename(&name)?;
    Ok(name)
}

// ── Encoders ──────────────────────────────────────────────────────────────────

/// JOIN: tag + 4-byte peer id. Encoding never fails.
pub fn encode_join(peer_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(Tag::Join.into());
    buf.put_u32(peer_id);
    buf.freeze()
}

/// PUBLISH: tag + 4-byte count + NUL-terminated names.
pub fn encode_publish(names: &[String], max_files: u32) -> Result<Bytes, WireError> {
    let count = names.len() as u32;
    if names.is_empty() || count > max_files {
        return Err(WireError::BadFileCount {
            count,
            max: max_files,
        });
    }
    let mut buf = BytesMut::new();
    buf.put_u8(Tag::Publish.into());
    buf.put_u32(count);
    for name in names {
        validate_filename(name)?;
        buf.put_slice(name.as_bytes());
        buf.put_u8(0);
    }
    Ok(buf.freeze())
}

/// SEARCH: tag + NUL-terminated filename.
pub fn encode_search(name: &str) -> Result<Bytes, WireError> {
    tagged_name(Tag::Search, name)
}

/// FETCH: tag + NUL-terminated filename.
pub fn encode_fetch(name: &str) -> Result<Bytes, WireError> {
    tagged_name(Tag::Fetch, name)
}

fn tagged_name(tag: Tag, name: &str) -> Result<Bytes, WireError> {
    validate_filename(name)?;
    let mut buf = BytesMut::with_capacity(name.len() + 2);
    buf.put_u8(tag.into());
    buf.put_slice(name.as_bytes());
    buf.put_u8(0);
    Ok(buf.freeze())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
