//! Scratch storage for blobs a manifest references more than once.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

/// Verified copies of shared blobs for the duration of one build.
///
/// The backing directory is created under `parent` on the first [`reserve`] and is
/// removed when the cache is closed or dropped.
///
/// [`reserve`]: ReconstructionCache::reserve
#[derive(Debug)]
pub struct ReconstructionCache {
    parent: PathBuf,
    dir: Option<TempDir>,
    entries: HashMap<String, PathBuf>,
}

impl ReconstructionCache {
    pub fn new(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: parent.into(),
            dir: None,
            entries: HashMap::new(),
        }
    }

    /// Path of a committed blob.
    pub fn lookup(&self, digest_hex: &str) -> Option<&Path> {
        self.entries.get(digest_hex).map(PathBuf::as_path)
    }

    /// Where a blob should be written before it is committed.
    pub fn reserve(&mut self, digest_hex: &str) -> io::Result<PathBuf> {
        let dir = match self.dir.take() {
            Some(dir) => dir,
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("image-cache-")
                    .tempdir_in(&self.parent)?;
                debug!(dir = %dir.path().display(), "Created reconstruction cache");
                dir
            }
        };
        let path = dir.path().join(digest_hex);
        self.dir = Some(dir);
        Ok(path)
    }

    /// Record a fully written and verified blob.
    pub fn commit(&mut self, digest_hex: &str, path: PathBuf) {
        self.entries.insert(digest_hex.to_string(), path);
    }

    /// Backing directory, once created.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove the backing directory now.
    pub fn close(mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(dir = %path.display(), error = %e, "Failed to remove reconstruction cache");
            }
        }
    }
}
