//! Shared-file library — the directory a peer publishes and serves.

use std::io;
use std::path::{Path, PathBuf};

use cairn_core::wire::validate_filename;

/// The peer's shared directory. `scan` builds the PUBLISH list; `open`
/// backs inbound FETCH requests. Names that fail protocol validation
/// (over-long, path separators, NUL) never touch the filesystem, so a
/// remote request cannot escape the root.
#[derive(Debug, Clone)]
pub struct FileLibrary {
    root: PathBuf,
}

impl FileLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of the regular files in the shared directory, sorted.
    /// Files whose names the protocol cannot carry are skipped with a
    /// warning.
    pub fn scan(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(raw) => {
                    tracing::warn!(name = %raw.to_string_lossy(), "skipping non-UTF-8 filename");
                    continue;
                }
            };
            if let Err(e) = validate_filename(&name) {
                tracing::warn!(name = %name, error = %e, "skipping unpublishable file");
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Open a shared file for serving. `Ok(None)` when it is absent or
    /// not a servable regular file.
    pub async fn open(&self, name: &str) -> io::Result<Option<tokio::fs::File>> {
        if validate_filename(name).is_err() {
            return Ok(None);
        }
        let path = self.root.join(name);
        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                if file.metadata().await?.is_file() {
                    Ok(Some(file))
                } else {
                    Ok(None)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
