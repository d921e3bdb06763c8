//! Gzip tar extraction.

use std::fs::{DirBuilder, File};
use std::io::{self, Read};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use scanprep_fetch::{BlobFetcher, CancellationToken, FetchError};
use tar::{Archive, EntryType};
use thiserror::Error;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info};

/// Errors from archive extraction.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unsupported tar entry type {kind} in {name}")]
    Unsupported { kind: String, name: String },

    #[error("unsafe path in archive: {0}")]
    UnsafePath(String),

    #[error("failed to decode archive: {0}")]
    Decode(#[source] io::Error),

    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("extraction task failed: {0}")]
    Worker(String),
}

/// What an extraction produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Expand a gzip-compressed tar stream into `dest`.
///
/// Directories are created with `mode`; regular files are written with default
/// permissions. Links and special files are rejected before anything is created for
/// them.
pub fn extract<R: Read>(reader: R, dest: &Path, mode: u32) -> Result<ExtractSummary, ArchiveError> {
    if !dest.exists() {
        DirBuilder::new().recursive(true).mode(mode).create(dest)?;
    }

    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut summary = ExtractSummary::default();

    for entry in archive.entries().map_err(ArchiveError::Decode)? {
        let mut entry = entry.map_err(ArchiveError::Decode)?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let relative: PathBuf = entry.path().map_err(ArchiveError::Decode)?.into_owned();
        if !is_safe_relative(&relative) {
            return Err(ArchiveError::UnsafePath(name));
        }
        let target = dest.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                DirBuilder::new().recursive(true).mode(mode).create(&target)?;
                summary.directories += 1;
            }
            EntryType::Regular => {
                let mut out = File::create(&target)?;
                summary.bytes += io::copy(&mut entry, &mut out)?;
                summary.files += 1;
            }
            other => {
                return Err(ArchiveError::Unsupported {
                    kind: format!("{other:?}"),
                    name,
                })
            }
        }
        debug!(entry = %name, "Extracted entry");
    }

    info!(
        dest = %dest.display(),
        directories = summary.directories,
        files = summary.files,
        "Archive extracted"
    );
    Ok(summary)
}

/// Extract a local `.tar.gz` file.
pub fn extract_file(archive: &Path, dest: &Path, mode: u32) -> Result<ExtractSummary, ArchiveError> {
    info!(archive = %archive.display(), dest = %dest.display(), "Extracting file");
    let file = File::open(archive)?;
    extract(io::BufReader::new(file), dest, mode)
}

/// Download `url` and extract it into `dest` while it streams in.
///
/// Once `cancel` fires the extraction fails at its next read with
/// [`FetchError::Cancelled`]; entries already written stay on disk.
pub async fn extract_url<F>(
    fetcher: &F,
    url: &str,
    dest: &Path,
    mode: u32,
    cancel: &CancellationToken,
) -> Result<ExtractSummary, ArchiveError>
where
    F: BlobFetcher + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled.into());
    }

    info!(url = %url, dest = %dest.display(), "Extracting remote archive");
    let stream = fetcher.download(url).await?;
    let reader = Cancellable {
        inner: SyncIoBridge::new(stream),
        cancel: cancel.clone(),
    };
    let dest = dest.to_path_buf();

    let result = tokio::task::spawn_blocking(move || extract(reader, &dest, mode))
        .await
        .map_err(|e| ArchiveError::Worker(e.to_string()))?;
    match result {
        Err(e) if cancel.is_cancelled() => {
            debug!(url = %url, error = %e, "Extraction stopped by cancellation");
            Err(FetchError::Cancelled.into())
        }
        other => other,
    }
}

/// Fails every read once `cancel` has fired.
struct Cancellable<R> {
    inner: R,
    cancel: CancellationToken,
}

impl<R: Read> Read for Cancellable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("extraction cancelled"));
        }
        self.inner.read(buf)
    }
}

fn is_safe_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_paths() {
        assert!(is_safe_relative(Path::new("db/trivy.db")));
        assert!(is_safe_relative(Path::new("./metadata.json")));
        assert!(!is_safe_relative(Path::new("../escape")));
        assert!(!is_safe_relative(Path::new("/etc/passwd")));
        assert!(!is_safe_relative(Path::new("a/../../b")));
    }
}
