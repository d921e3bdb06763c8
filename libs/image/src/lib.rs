//! # scanprep-image
//!
//! Turns a registry image (schema 2 manifest, config blob, ordered layer blobs) into a
//! single legacy `docker save` style tar that generic scanners can open.
//!
//! - [`ImageManifest`] / [`LayerRef`]: the registry manifest and digest parsing
//! - [`BlobIndex`]: the task's blob references keyed by digest
//! - [`ImageReconstructor`]: fetch, verify, deduplicate and write the archive

mod blob;
mod cache;
mod error;
mod legacy;
mod manifest;
mod reconstruct;
mod tar_writer;

pub use blob::{BlobIndex, BlobReference};
pub use cache::ReconstructionCache;
pub use error::ImageError;
pub use legacy::{config_path, layer_dir, layer_tar_path, LegacyManifestEntry, MANIFEST_ENTRY};
pub use manifest::{parse_digest, ImageManifest, LayerRef};
pub use reconstruct::{FetchStats, ImageReconstructor, LegacyArchive, ReconstructState};
pub use tar_writer::ArchiveWriter;
