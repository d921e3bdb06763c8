//! # scanprep-fetch
//!
//! Blob acquisition for scan inputs: one shared retrying HTTP [`Transport`], two
//! download strategies behind the [`BlobFetcher`] capability, and streaming SHA-256
//! verification.
//!
//! ## Strategies
//!
//! - [`StreamDownloader`]: a single GET, body handed back unread
//! - [`ChunkedDownloader`]: HEAD for the size, then parallel `Range` requests written
//!   into one temp file at disjoint offsets
//!
//! [`Downloader`] selects between them from the task's worker count.

mod backoff;
mod chunked;
mod downloader;
mod error;
mod stream;
mod transport;
mod verify;

pub use backoff::BackoffPolicy;
pub use chunked::{default_worker_count, split_ranges, ByteRange, ChunkedConfig, ChunkedDownloader};
pub use downloader::{BlobFetcher, BlobStream, Downloader, DownloaderConfig};
pub use error::FetchError;
pub use stream::StreamDownloader;
pub use transport::{Transport, TransportConfig};
pub use verify::{copy_and_verify, copy_and_verify_fanout, digests_match, sha256_hex, Sha256Verifier};

/// Re-exported so callers can build header maps and tokens without extra deps.
pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use tokio_util::sync::CancellationToken;
