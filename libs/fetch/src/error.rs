//! Fetch error types.

use std::io;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors from downloading and verifying blobs.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS or request-level failure from the HTTP client.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body failed while it was being read.
    #[error("error reading response body: {0}")]
    Stream(#[source] io::Error),

    /// The server answered with a status the protocol step does not accept.
    #[error("unexpected status {status} from {url}")]
    HttpStatus { url: String, status: StatusCode },

    /// HEAD response without a usable `Content-Length`.
    #[error("missing or invalid Content-Length from {url}")]
    MissingContentLength { url: String },

    /// A ranged response delivered a different number of bytes than requested.
    #[error("range {range} returned {actual} bytes, expected {expected}")]
    RangeLength {
        range: String,
        expected: u64,
        actual: u64,
    },

    /// Computed digest does not match the declared digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// The overall deadline expired.
    #[error("download deadline exceeded")]
    Timeout,

    /// The operation was cancelled before it completed.
    #[error("download cancelled")]
    Cancelled,

    /// A download worker task panicked or was aborted unexpectedly.
    #[error("download worker failed: {0}")]
    Worker(String),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FetchError {
    /// Classify an error raised while reading a blob body.
    ///
    /// Downloaders abort a body on cancellation with an I/O error wrapping
    /// [`FetchError::Cancelled`]; that is unwrapped here, anything else is a
    /// [`FetchError::Stream`] failure.
    pub fn from_read(error: io::Error) -> Self {
        if is_cancellation(&error) {
            FetchError::Cancelled
        } else {
            FetchError::Stream(error)
        }
    }

    /// I/O error used to abort a body read on cancellation.
    pub(crate) fn cancelled_read() -> io::Error {
        io::Error::other(FetchError::Cancelled)
    }

    /// Whether the error came from the network side rather than local resources.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FetchError::Transport(_) | FetchError::Stream(_) | FetchError::Timeout
        )
    }
}

/// Whether `error` is a body read aborted by cancellation.
fn is_cancellation(error: &io::Error) -> bool {
    error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<FetchError>())
        .is_some_and(|inner| matches!(inner, FetchError::Cancelled))
}
