//! Downloader capability and strategy selection.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::chunked::{ChunkedConfig, ChunkedDownloader};
use crate::error::FetchError;
use crate::stream::StreamDownloader;
use crate::transport::Transport;

/// An unread blob body.
pub type BlobStream = Pin<Box<dyn AsyncRead + Send>>;

/// Anything that can turn a URL into a byte stream.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Fetch `url`. The returned stream has not been verified.
    async fn download(&self, url: &str) -> Result<BlobStream, FetchError>;
}

/// Per-task downloader settings.
#[derive(Debug, Clone, Default)]
pub struct DownloaderConfig {
    /// `> 0` selects range-parallel downloads with that many workers.
    pub worker_count: i64,
    /// Directory for chunked-download temp files.
    pub temp_dir: PathBuf,
    /// Extra request headers.
    pub headers: HeaderMap,
}

/// The download strategies, chosen once from configuration.
#[derive(Debug, Clone)]
pub enum Downloader {
    Stream(StreamDownloader),
    Chunked(ChunkedDownloader),
}

impl Downloader {
    /// Pick a strategy: chunked when a positive worker count is configured, otherwise
    /// a plain stream. Either way `cancel` aborts its downloads.
    pub fn from_config(
        transport: Arc<Transport>,
        config: DownloaderConfig,
        cancel: CancellationToken,
    ) -> Self {
        if config.worker_count > 0 {
            Downloader::Chunked(
                ChunkedDownloader::new(
                    transport,
                    ChunkedConfig {
                        worker_count: config.worker_count,
                        temp_dir: config.temp_dir,
                        headers: config.headers,
                    },
                )
                .with_cancellation(cancel),
            )
        } else {
            Downloader::Stream(
                StreamDownloader::with_headers(transport, config.headers).with_cancellation(cancel),
            )
        }
    }

    /// Strategy name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Downloader::Stream(_) => "stream",
            Downloader::Chunked(_) => "chunked",
        }
    }
}

#[async_trait]
impl BlobFetcher for Downloader {
    async fn download(&self, url: &str) -> Result<BlobStream, FetchError> {
        match self {
            Downloader::Stream(d) => d.download(url).await,
            Downloader::Chunked(d) => BlobFetcher::download(d, url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportConfig;

    fn transport() -> Arc<Transport> {
        Arc::new(Transport::new(TransportConfig::default()).unwrap())
    }

    #[test]
    fn test_positive_worker_count_selects_chunked() {
        let config = DownloaderConfig {
            worker_count: 3,
            temp_dir: std::env::temp_dir(),
            headers: HeaderMap::new(),
        };
        let downloader = Downloader::from_config(transport(), config, CancellationToken::new());

        match downloader {
            Downloader::Chunked(d) => assert_eq!(d.worker_count(), 3),
            other => panic!("expected chunked downloader, got {}", other.kind()),
        }
    }

    #[test]
    fn test_non_positive_worker_count_selects_stream() {
        for worker_count in [0, -1] {
            let config = DownloaderConfig {
                worker_count,
                ..Default::default()
            };
            let downloader =
                Downloader::from_config(transport(), config, CancellationToken::new());
            assert_eq!(downloader.kind(), "stream");
        }
    }
}
