//! Turns a task descriptor into a verified local file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use scanprep_archive::{extract_file, extract_url, ExtractSummary};
use scanprep_fetch::{
    copy_and_verify, BlobFetcher, CancellationToken, Downloader, DownloaderConfig, FetchError,
    HeaderMap, StreamDownloader, Transport,
};
use scanprep_image::{BlobIndex, BlobReference, ImageReconstructor};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncSeekExt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::InputError;
use crate::headers::parse_header_spec;
use crate::task::TaskDescriptor;

/// File name of a reconstructed image inside the work directory.
pub const IMAGE_ARCHIVE_NAME: &str = "image.tar";

/// How the input was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// `filePath` pointed at an existing file.
    Local,
    /// A single downloaded artifact.
    Artifact,
    /// A reconstructed container image archive.
    Image,
}

/// A ready-to-scan input, positioned at the start.
#[derive(Debug)]
pub struct PreparedInput {
    pub path: PathBuf,
    pub file: File,
    pub kind: InputKind,
}

/// Acquires scan inputs over one shared transport.
pub struct InputPreparer {
    transport: Arc<Transport>,
    config: Config,
    cancel: CancellationToken,
}

impl InputPreparer {
    pub fn new(transport: Arc<Transport>, config: Config) -> Self {
        Self {
            transport,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Build the transport from `config` as well.
    pub fn from_config(config: Config) -> Result<Self, InputError> {
        let transport = Transport::new(config.transport_config())?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token cancelling every in-flight download started by this preparer.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Downloader selected by the task's worker count and headers.
    pub fn downloader_for(&self, task: &TaskDescriptor) -> Result<Downloader, InputError> {
        let headers = match task.worker_headers() {
            Some(spec) => parse_header_spec(spec)?,
            None => HeaderMap::new(),
        };
        let config = DownloaderConfig {
            worker_count: task.worker_count()?,
            temp_dir: self.config.work_dir.clone(),
            headers,
        };
        let downloader = Downloader::from_config(
            Arc::clone(&self.transport),
            config,
            self.cancel.child_token(),
        );
        debug!(kind = downloader.kind(), "Selected downloader");
        Ok(downloader)
    }

    /// Produce the local input for `task`, within the configured download deadline.
    ///
    /// A download that fails or runs out of time removes the output file it started
    /// writing. A file left by an earlier run survives failures raised before that
    /// point. Image builds clean up their own archive.
    pub async fn prepare(&self, task: &TaskDescriptor) -> Result<PreparedInput, InputError> {
        let started = Instant::now();

        if let Some(path) = task.local_file() {
            info!(task_id = %task.task_id, path = %path.display(), "Using local input file");
            let file = File::open(path).await?;
            return Ok(PreparedInput {
                path: path.clone(),
                file,
                kind: InputKind::Local,
            });
        }

        let first = task.file_urls.first().ok_or(InputError::NoInput)?;
        let target = self.target_path(task, first);
        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let mut created = false;
        let acquisition = self.acquire(task, first, &target, &mut created);
        let result = match self.config.download_timeout {
            Some(limit) => match tokio::time::timeout(limit, acquisition).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(task_id = %task.task_id, timeout_secs = limit.as_secs(), "Input download timed out");
                    Err(FetchError::Timeout.into())
                }
            },
            None => acquisition.await,
        };

        match result {
            Ok(input) => {
                info!(
                    task_id = %task.task_id,
                    path = %input.path.display(),
                    kind = ?input.kind,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Input prepared"
                );
                Ok(input)
            }
            Err(e) => {
                if created {
                    remove_partial(&target).await;
                }
                Err(e)
            }
        }
    }

    fn target_path(&self, task: &TaskDescriptor, first: &BlobReference) -> PathBuf {
        if task.is_image() {
            return self.config.work_dir.join(IMAGE_ARCHIVE_NAME);
        }
        let name = Path::new(&first.name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| first.sha256.clone().into());
        self.config.work_dir.join(name)
    }

    async fn acquire(
        &self,
        task: &TaskDescriptor,
        first: &BlobReference,
        target: &Path,
        created: &mut bool,
    ) -> Result<PreparedInput, InputError> {
        let downloader = self.downloader_for(task)?;

        if task.is_image() {
            info!(task_id = %task.task_id, manifest = %first.url, "Reconstructing image");
            let blobs: BlobIndex = task.file_urls.iter().cloned().collect();
            let mut reconstructor =
                ImageReconstructor::new(Arc::new(downloader), blobs, &self.config.work_dir)
                    .with_cancellation(self.cancel.child_token());
            let archive = reconstructor.build(&first.url, target).await?;
            return Ok(PreparedInput {
                path: archive.path,
                file: archive.file,
                kind: InputKind::Image,
            });
        }

        info!(task_id = %task.task_id, url = %first.url, path = %target.display(), "Downloading input");
        let mut source = downloader.download(&first.url).await?;
        *created = true;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(target)
            .await?;
        let written = copy_and_verify(&mut source, &mut file, &first.sha256).await?;
        file.seek(SeekFrom::Start(0)).await?;
        debug!(bytes = written, path = %target.display(), "Input verified");

        Ok(PreparedInput {
            path: target.to_path_buf(),
            file,
            kind: InputKind::Artifact,
        })
    }

    /// Download a gzip tarball and expand it into `dest`.
    pub async fn extract_archive(
        &self,
        url: &str,
        dest: &Path,
    ) -> Result<ExtractSummary, InputError> {
        let cancel = self.cancel.child_token();
        let downloader =
            StreamDownloader::new(Arc::clone(&self.transport)).with_cancellation(cancel.clone());
        Ok(extract_url(&downloader, url, dest, self.config.extract_mode, &cancel).await?)
    }

    /// Expand a local gzip tarball into `dest`.
    pub async fn extract_local(
        &self,
        archive: &Path,
        dest: &Path,
    ) -> Result<ExtractSummary, InputError> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        let mode = self.config.extract_mode;
        let summary = tokio::task::spawn_blocking(move || extract_file(&archive, &dest, mode))
            .await
            .map_err(|e| InputError::Io(std::io::Error::other(e)))??;
        Ok(summary)
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial input"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial input"),
    }
}
