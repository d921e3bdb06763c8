//! Sequential single-request downloader.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::downloader::{BlobFetcher, BlobStream};
use crate::error::FetchError;
use crate::transport::Transport;

/// Fetches a URL as one sequential byte stream.
#[derive(Debug, Clone)]
pub struct StreamDownloader {
    transport: Arc<Transport>,
    headers: HeaderMap,
    cancel: CancellationToken,
}

impl StreamDownloader {
    /// Create a stream downloader without extra headers.
    pub fn new(transport: Arc<Transport>) -> Self {
        Self::with_headers(transport, HeaderMap::new())
    }

    /// Create a stream downloader that sends `headers` with every request.
    pub fn with_headers(transport: Arc<Transport>, headers: HeaderMap) -> Self {
        Self {
            transport,
            headers,
            cancel: CancellationToken::new(),
        }
    }

    /// Tie every download, including reads of returned bodies, to `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Issue the GET and hand back the unread body.
    ///
    /// Once the token fires, the request (and any retry backoff) is abandoned, or the
    /// next body read fails with an error that [`FetchError::from_read`] maps to
    /// [`FetchError::Cancelled`].
    pub async fn download(&self, url: &str) -> Result<BlobStream, FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        info!(url = %url, "Downloading");
        let response = tokio::select! {
            _ = self.cancel.cancelled() => {
                warn!(url = %url, "Download cancelled before response");
                return Err(FetchError::Cancelled);
            }
            response = self.transport.get(url, &self.headers) => response?,
        };

        if response.status() != StatusCode::OK {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let body = until_cancelled(response.bytes_stream(), self.cancel.clone());
        Ok(Box::pin(StreamReader::new(body)))
    }
}

/// Forward `body` chunks until `cancel` fires, then fail every further read.
fn until_cancelled<S, B>(
    body: S,
    cancel: CancellationToken,
) -> impl Stream<Item = io::Result<B>> + Send
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: Send + 'static,
{
    stream::unfold((Box::pin(body), cancel), |(mut body, cancel)| async move {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => Some(Err(FetchError::cancelled_read())),
            next = body.next() => next.map(|chunk| chunk.map_err(io::Error::other)),
        };
        next.map(|item| (item, (body, cancel)))
    })
}

#[async_trait]
impl BlobFetcher for StreamDownloader {
    async fn download(&self, url: &str) -> Result<BlobStream, FetchError> {
        StreamDownloader::download(self, url).await
    }
}
