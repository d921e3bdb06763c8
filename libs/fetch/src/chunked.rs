//! Range-parallel downloader.
//!
//! The remote size is read with a `HEAD` request, `[0, size)` is split into one
//! contiguous range per worker, and every range is fetched concurrently with a
//! `Range: bytes=<start>-<end>` request. Workers write straight into a shared anonymous
//! temp file at their own offsets; ranges are disjoint so the writes need no locking.
//!
//! All workers share one cancellation token derived from the downloader's token. The
//! first failing worker cancels its siblings and its error is returned; nothing of a
//! failed download is kept.

use std::fmt;
use std::fs::File;
use std::io::SeekFrom;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use tokio::io::AsyncSeekExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::downloader::{BlobFetcher, BlobStream};
use crate::error::FetchError;
use crate::transport::Transport;

/// A half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Value for the `Range` request header (inclusive end).
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end - 1)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// Split `[0, size)` into `workers` contiguous ranges.
///
/// Every range has `size / workers` bytes except the last, which absorbs the
/// remainder. When `size < workers` the leading ranges are empty.
pub fn split_ranges(size: u64, workers: usize) -> Vec<ByteRange> {
    let workers = workers.max(1) as u64;
    let chunk = size / workers;

    (0..workers)
        .map(|i| {
            let start = i * chunk;
            let end = if i == workers - 1 { size } else { start + chunk };
            ByteRange { start, end }
        })
        .collect()
}

/// Number of workers used when the configured count is not positive.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration for the chunked downloader.
#[derive(Debug, Clone)]
pub struct ChunkedConfig {
    /// Parallel range requests; `<= 0` means one per available CPU.
    pub worker_count: i64,
    /// Directory that holds the temp file while ranges are written.
    pub temp_dir: PathBuf,
    /// Extra headers sent with the HEAD and every range request.
    pub headers: HeaderMap,
}

/// Downloads a URL with parallel range requests.
#[derive(Debug, Clone)]
pub struct ChunkedDownloader {
    transport: Arc<Transport>,
    workers: usize,
    temp_dir: PathBuf,
    headers: HeaderMap,
    cancel: CancellationToken,
}

impl ChunkedDownloader {
    /// Create a chunked downloader.
    pub fn new(transport: Arc<Transport>, config: ChunkedConfig) -> Self {
        let workers = if config.worker_count > 0 {
            config.worker_count as usize
        } else {
            default_worker_count()
        };

        Self {
            transport,
            workers,
            temp_dir: config.temp_dir,
            headers: config.headers,
            cancel: CancellationToken::new(),
        }
    }

    /// Tie every download to an external cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Effective number of workers.
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Download `url` into an anonymous temp file and return it.
    pub async fn download_file(&self, url: &str) -> Result<File, FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let started = Instant::now();
        info!(url = %url, workers = self.workers, "Downloading in chunks");

        let size = self.content_length(url).await?;
        let file = Arc::new(tempfile::tempfile_in(&self.temp_dir)?);
        file.set_len(size)?;

        let group = self.cancel.child_token();
        let mut tasks = JoinSet::new();
        for range in split_ranges(size, self.workers)
            .into_iter()
            .filter(|r| !r.is_empty())
        {
            tasks.spawn(fetch_range(
                Arc::clone(&self.transport),
                url.to_string(),
                self.headers.clone(),
                range,
                Arc::clone(&file),
                group.clone(),
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(FetchError::Worker(e.to_string())));
            if let Err(e) = result {
                group.cancel();
                tasks.abort_all();
                warn!(url = %url, error = %e, "Chunked download failed");
                return Err(e);
            }
        }

        info!(
            url = %url,
            size_bytes = size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chunked download finished"
        );

        Arc::into_inner(file)
            .ok_or_else(|| FetchError::Worker("temp file still shared after workers finished".into()))
    }

    async fn content_length(&self, url: &str) -> Result<u64, FetchError> {
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self.transport.head(url, &self.headers) => response?,
        };
        if response.status() != StatusCode::OK {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }

        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| FetchError::MissingContentLength {
                url: url.to_string(),
            })
    }
}

#[async_trait]
impl BlobFetcher for ChunkedDownloader {
    async fn download(&self, url: &str) -> Result<BlobStream, FetchError> {
        let mut file = tokio::fs::File::from_std(self.download_file(url).await?);
        file.seek(SeekFrom::Start(0)).await?;
        Ok(Box::pin(file))
    }
}

/// Fetch one range and write it at its offset.
async fn fetch_range(
    transport: Arc<Transport>,
    url: String,
    mut headers: HeaderMap,
    range: ByteRange,
    file: Arc<File>,
    cancel: CancellationToken,
) -> Result<(), FetchError> {
    let started = Instant::now();
    debug!(url = %url, range = %range, "Fetching range");

    let value = HeaderValue::try_from(range.header_value())
        .map_err(|e| FetchError::Worker(e.to_string()))?;
    headers.insert(RANGE, value);

    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        response = transport.get(&url, &headers) => response?,
    };
    if response.status() != StatusCode::PARTIAL_CONTENT {
        return Err(FetchError::HttpStatus {
            url,
            status: response.status(),
        });
    }

    let mut body = Box::pin(response.bytes_stream());
    let mut offset = range.start;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            next = body.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk?;

        let written = offset - range.start + chunk.len() as u64;
        if written > range.len() {
            return Err(FetchError::RangeLength {
                range: range.to_string(),
                expected: range.len(),
                actual: written,
            });
        }

        let target = Arc::clone(&file);
        let at = offset;
        tokio::task::spawn_blocking(move || target.write_all_at(&chunk, at))
            .await
            .map_err(|e| FetchError::Worker(e.to_string()))??;
        offset = range.start + written;
    }

    let received = offset - range.start;
    if received != range.len() {
        return Err(FetchError::RangeLength {
            range: range.to_string(),
            expected: range.len(),
            actual: received,
        });
    }

    debug!(
        range = %range,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Range written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(100, 4, vec![(0, 25), (25, 50), (50, 75), (75, 100)])]
    #[case(10, 3, vec![(0, 3), (3, 6), (6, 10)])]
    #[case(2, 4, vec![(0, 0), (0, 0), (0, 0), (0, 2)])]
    #[case(0, 2, vec![(0, 0), (0, 0)])]
    #[case(7, 1, vec![(0, 7)])]
    fn test_split_ranges(
        #[case] size: u64,
        #[case] workers: usize,
        #[case] expected: Vec<(u64, u64)>,
    ) {
        let ranges: Vec<(u64, u64)> = split_ranges(size, workers)
            .into_iter()
            .map(|r| (r.start, r.end))
            .collect();
        assert_eq!(ranges, expected);
    }

    #[test]
    fn test_zero_workers_treated_as_one() {
        assert_eq!(split_ranges(9, 0), vec![ByteRange { start: 0, end: 9 }]);
    }

    #[test]
    fn test_range_header_is_inclusive() {
        let range = ByteRange { start: 25, end: 50 };
        assert_eq!(range.header_value(), "bytes=25-49");
        assert_eq!(range.to_string(), "25-49");
        assert_eq!(range.len(), 25);
    }

    proptest! {
        #[test]
        fn prop_ranges_cover_exactly(size in 0u64..1_000_000, workers in 1usize..64) {
            let ranges = split_ranges(size, workers);
            prop_assert_eq!(ranges.len(), workers);
            prop_assert_eq!(ranges[0].start, 0);
            prop_assert_eq!(ranges[ranges.len() - 1].end, size);
            for pair in ranges.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
            }
            for range in &ranges {
                prop_assert!(range.start <= range.end);
            }
            let total: u64 = ranges.iter().map(ByteRange::len).sum();
            prop_assert_eq!(total, size);
        }
    }
}
