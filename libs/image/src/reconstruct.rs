//! Legacy image archive assembly.
//!
//! The manifest is downloaded and decoded, every digest is resolved against the task's
//! [`BlobIndex`], and the output is then written strictly in manifest order:
//!
//! ```text
//! <config>.json
//! <layer>/            (per layer, repeated layers included)
//! <layer>/layer.tar
//! manifest.json
//! ```
//!
//! Every blob is hashed while it is copied. A layer digest that appears more than once
//! is also copied into a [`ReconstructionCache`] on its first download, and later
//! occurrences are read back from there (and verified again) instead of the network.
//!
//! The build checks its cancellation token before every archive entry, so a cancelled
//! build stops at the next entry boundary even when blobs come from the cache.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use scanprep_fetch::{
    copy_and_verify, copy_and_verify_fanout, BlobFetcher, CancellationToken, FetchError,
};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWrite};
use tracing::{debug, info, warn};

use crate::blob::{BlobIndex, BlobReference};
use crate::cache::ReconstructionCache;
use crate::error::ImageError;
use crate::legacy::{config_path, layer_dir, layer_tar_path, LegacyManifestEntry, MANIFEST_ENTRY};
use crate::manifest::ImageManifest;
use crate::tar_writer::ArchiveWriter;

/// Progress of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructState {
    Idle,
    ManifestFetched,
    ConfigWritten,
    LayersWritten { done: usize, total: usize },
    ManifestWritten,
    Complete,
    Failed,
}

impl ReconstructState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReconstructState::Complete | ReconstructState::Failed)
    }
}

impl fmt::Display for ReconstructState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconstructState::Idle => write!(f, "idle"),
            ReconstructState::ManifestFetched => write!(f, "manifest_fetched"),
            ReconstructState::ConfigWritten => write!(f, "config_written"),
            ReconstructState::LayersWritten { done, total } => {
                write!(f, "layers_written({done}/{total})")
            }
            ReconstructState::ManifestWritten => write!(f, "manifest_written"),
            ReconstructState::Complete => write!(f, "complete"),
            ReconstructState::Failed => write!(f, "failed"),
        }
    }
}

/// Where blobs came from during a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub network_fetches: usize,
    pub cache_hits: usize,
}

/// A finished archive, rewound to the start.
#[derive(Debug)]
pub struct LegacyArchive {
    pub path: PathBuf,
    pub file: File,
    pub stats: FetchStats,
}

/// Config and layers resolved to downloadable blobs.
#[derive(Debug)]
struct BuildPlan {
    config_hex: String,
    config: BlobReference,
    layers: Vec<(String, BlobReference)>,
    frequency: HashMap<String, usize>,
}

impl BuildPlan {
    fn new(manifest: &ImageManifest, blobs: &BlobIndex) -> Result<Self, ImageError> {
        let config_hex = manifest.config.sha256()?;
        let frequency = manifest.digest_frequency()?;
        let (config, layers) = blobs.require_all(manifest)?;
        let config = config.clone();
        let layers = layers
            .into_iter()
            .map(|(hex, blob)| (hex, blob.clone()))
            .collect();

        Ok(Self {
            config_hex,
            config,
            layers,
            frequency,
        })
    }

    fn is_shared(&self, digest_hex: &str) -> bool {
        self.frequency.get(digest_hex).copied().unwrap_or(0) > 1
    }

    fn legacy_manifest(&self) -> Vec<LegacyManifestEntry> {
        vec![LegacyManifestEntry::new(
            &self.config_hex,
            self.layers.iter().map(|(hex, _)| hex.as_str()),
        )]
    }
}

/// Builds legacy archives from a registry manifest through a [`BlobFetcher`].
pub struct ImageReconstructor<F: ?Sized> {
    fetcher: Arc<F>,
    blobs: BlobIndex,
    work_dir: PathBuf,
    state: ReconstructState,
    cancel: CancellationToken,
}

impl<F: BlobFetcher + ?Sized> ImageReconstructor<F> {
    /// `work_dir` hosts the per-build cache directory.
    pub fn new(fetcher: Arc<F>, blobs: BlobIndex, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            blobs,
            work_dir: work_dir.into(),
            state: ReconstructState::Idle,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the build with [`FetchError::Cancelled`] once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> ReconstructState {
        self.state
    }

    /// Download the manifest at `manifest_url` and write the archive to `output`.
    ///
    /// A failure after the output was created removes it; so does dropping the build
    /// before it completes. An existing file at `output` is untouched until the
    /// manifest and every blob have resolved.
    pub async fn build(
        &mut self,
        manifest_url: &str,
        output: &Path,
    ) -> Result<LegacyArchive, ImageError> {
        let started = Instant::now();
        self.state = ReconstructState::Idle;

        let result = self.run(manifest_url, output).await;
        match &result {
            Ok(archive) => {
                self.transition(ReconstructState::Complete);
                info!(
                    output = %output.display(),
                    network_fetches = archive.stats.network_fetches,
                    cache_hits = archive.stats.cache_hits,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Image archive built"
                );
            }
            Err(e) => {
                self.transition(ReconstructState::Failed);
                warn!(manifest = %manifest_url, error = %e, "Image archive build failed");
            }
        }
        result
    }

    fn checkpoint(&self) -> Result<(), ImageError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled.into());
        }
        Ok(())
    }

    fn transition(&mut self, next: ReconstructState) {
        debug!(from = %self.state, to = %next, "Reconstruction state");
        self.state = next;
    }

    async fn run(&mut self, manifest_url: &str, output: &Path) -> Result<LegacyArchive, ImageError> {
        self.checkpoint()?;
        let manifest = self.fetch_manifest(manifest_url).await?;
        self.transition(ReconstructState::ManifestFetched);

        let plan = BuildPlan::new(&manifest, &self.blobs)?;
        self.checkpoint()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(output)
            .await?;
        let mut partial = PartialOutput::new(output);

        let (file, stats) = self.write_archive(&plan, file).await?;
        partial.keep();
        Ok(LegacyArchive {
            path: output.to_path_buf(),
            file,
            stats,
        })
    }

    async fn fetch_manifest(&self, url: &str) -> Result<ImageManifest, ImageError> {
        debug!(url = %url, "Fetching image manifest");
        let mut stream = self.fetcher.download(url).await?;
        let mut body = Vec::new();
        stream
            .read_to_end(&mut body)
            .await
            .map_err(FetchError::from_read)?;

        let manifest = ImageManifest::from_slice(&body)?;
        info!(
            url = %url,
            media_type = %manifest.media_type,
            layers = manifest.layers.len(),
            "Fetched image manifest"
        );
        Ok(manifest)
    }

    async fn write_archive(
        &mut self,
        plan: &BuildPlan,
        file: File,
    ) -> Result<(File, FetchStats), ImageError> {
        let mut writer = ArchiveWriter::new(file);
        let mut cache = ReconstructionCache::new(&self.work_dir);
        let mut stats = FetchStats::default();

        self.checkpoint()?;
        let mut source = self.fetcher.download(&plan.config.url).await?;
        stats.network_fetches += 1;
        writer
            .begin_file(&config_path(&plan.config_hex), plan.config.size)
            .await?;
        let written = copy_and_verify(&mut source, writer.body(), &plan.config.sha256).await?;
        writer.end_file(written).await?;
        self.transition(ReconstructState::ConfigWritten);

        let total = plan.layers.len();
        for (index, (hex, blob)) in plan.layers.iter().enumerate() {
            self.checkpoint()?;
            writer.append_directory(&layer_dir(hex)).await?;
            self.write_layer(
                &mut writer,
                &mut cache,
                &mut stats,
                hex,
                blob,
                plan.is_shared(hex),
            )
            .await?;
            self.transition(ReconstructState::LayersWritten {
                done: index + 1,
                total,
            });
        }

        self.checkpoint()?;
        let manifest = serde_json::to_vec(&plan.legacy_manifest())?;
        writer.append_bytes(MANIFEST_ENTRY, &manifest).await?;
        self.transition(ReconstructState::ManifestWritten);

        let file = writer.finish().await?;
        cache.close();
        Ok((file, stats))
    }

    async fn write_layer(
        &self,
        writer: &mut ArchiveWriter,
        cache: &mut ReconstructionCache,
        stats: &mut FetchStats,
        hex: &str,
        blob: &BlobReference,
        shared: bool,
    ) -> Result<(), ImageError> {
        let name = layer_tar_path(hex);

        if let Some(cached) = cache.lookup(hex) {
            debug!(digest = %hex, "Layer served from cache");
            let mut source = File::open(cached).await?;
            writer.begin_file(&name, blob.size).await?;
            let written = copy_and_verify(&mut source, writer.body(), &blob.sha256).await?;
            stats.cache_hits += 1;
            return writer.end_file(written).await;
        }

        debug!(digest = %hex, url = %blob.url, shared, "Downloading layer");
        let mut source = self.fetcher.download(&blob.url).await?;
        stats.network_fetches += 1;
        writer.begin_file(&name, blob.size).await?;

        if !shared {
            let written = copy_and_verify(&mut source, writer.body(), &blob.sha256).await?;
            return writer.end_file(written).await;
        }

        let cache_path = cache.reserve(hex)?;
        let mut cache_file = File::create(&cache_path).await?;
        let sinks: &mut [&mut (dyn AsyncWrite + Unpin + Send)] =
            &mut [writer.body(), &mut cache_file];
        let written = copy_and_verify_fanout(&mut source, sinks, &blob.sha256).await?;
        writer.end_file(written).await?;
        cache.commit(hex, cache_path);
        Ok(())
    }
}

/// Removes a half-written archive when dropped, including when the build future
/// itself is dropped by a caller's deadline.
struct PartialOutput {
    path: PathBuf,
    keep: bool,
}

impl PartialOutput {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            keep: false,
        }
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(output = %self.path.display(), "Removed partial archive"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(output = %self.path.display(), error = %e, "Failed to remove partial archive"),
        }
    }
}
