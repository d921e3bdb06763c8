use std::io;

use scanprep_fetch::FetchError;
use thiserror::Error;

/// Errors from image reconstruction.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("malformed manifest: {0}")]
    Manifest(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("no blob reference for digest {digest}")]
    MissingBlob { digest: String },

    #[error("{name}: declared {declared} bytes, received {actual}")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },

    #[error("archive entry name too long: {0}")]
    EntryName(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImageError {
    /// True when the blob content did not hash to its declared digest.
    pub fn is_integrity(&self) -> bool {
        matches!(self, ImageError::Fetch(FetchError::Integrity { .. }))
    }
}
