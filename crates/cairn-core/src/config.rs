//! Configuration system for cairn.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CAIRN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cairn/config.toml
//!   3. ~/.config/cairn/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::{DEFAULT_MAX_FILES_PER_PEER, DEFAULT_MAX_PEERS};

/// Top-level configuration. One file serves both binaries; each reads
/// the section it cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub registry: RegistryConfig,
    pub peer: PeerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// TCP port the registry listens on. The `cairnd` positional
    /// argument overrides this.
    pub port: u16,

    /// Concurrently joined peers admitted before JOIN is rejected.
    pub max_peers: usize,

    /// Filenames accepted per PUBLISH; larger declared counts are
    /// treated as malformed.
    pub max_files_per_peer: u32,

    /// Seconds a peer gets to finish a message body once its tag byte
    /// has arrived. Idle time between messages is unlimited. 0 disables.
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Directory scanned for PUBLISH and served on FETCH.
    pub shared_dir: PathBuf,

    /// Where fetched files are written.
    pub download_dir: PathBuf,

    /// Local port shared by the control connection and the data-plane
    /// listener. 0 = OS-assigned.
    pub data_port: u16,

    /// Most filenames sent in one PUBLISH; longer scans are truncated.
    pub max_publish_files: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for CairnConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            peer: PeerConfig::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            port: 7077,
            max_peers: DEFAULT_MAX_PEERS,
            max_files_per_peer: DEFAULT_MAX_FILES_PER_PEER,
            read_timeout_secs: 30,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            shared_dir: PathBuf::from("SharedFiles"),
            download_dir: PathBuf::from("."),
            data_port: 0,
            max_publish_files: DEFAULT_MAX_FILES_PER_PEER,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("cairn")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CairnConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CairnConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CAIRN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CairnConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CAIRN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CAIRN_REGISTRY__PORT") {
            if let Ok(p) = v.parse() {
                self.registry.port = p;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_REGISTRY__MAX_PEERS") {
            if let Ok(n) = v.parse() {
                self.registry.max_peers = n;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_REGISTRY__MAX_FILES_PER_PEER") {
            if let Ok(n) = v.parse() {
                self.registry.max_files_per_peer = n;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_REGISTRY__READ_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.registry.read_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_PEER__SHARED_DIR") {
            self.peer.shared_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CAIRN_PEER__DOWNLOAD_DIR") {
            self.peer.download_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CAIRN_PEER__DATA_PORT") {
            if let Ok(p) = v.parse() {
                self.peer.data_port = p;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_PEER__MAX_PUBLISH_FILES") {
            if let Ok(n) = v.parse() {
                self.peer.max_publish_files = n;
            }
        }
    }
}
