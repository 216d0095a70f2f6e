//! cairn-services — the registry's session table and server loop, and
//! the peer's registry client, shared-file library, and data-plane
//! transfer logic. The binaries in `cairnd` and `cairn-peer` only wire
//! these together.

pub mod client;
pub mod library;
pub mod registry;
pub mod session;
pub mod transfer;

pub use client::{ClientError, RegistryClient};
pub use library::FileLibrary;
pub use registry::{RegistryServer, RegistrySettings};
pub use session::{ConnId, PeerEntry, SessionError, SessionTable};
pub use transfer::{fetch, FetchError, FetchOutcome, FileServer};
