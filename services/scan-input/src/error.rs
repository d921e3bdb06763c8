use std::io;

use scanprep_archive::ArchiveError;
use scanprep_fetch::FetchError;
use scanprep_image::ImageError;
use thiserror::Error;

/// Errors from preparing a scan input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("task has no file to scan")]
    NoInput,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InputError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True when the overall download deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, InputError::Fetch(FetchError::Timeout))
    }
}
