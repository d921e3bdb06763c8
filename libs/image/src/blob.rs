//! Blob references and the per-task digest index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ImageError;
use crate::manifest::ImageManifest;

/// Where a blob can be downloaded and what it must hash to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobReference {
    pub url: String,
    #[serde(default)]
    pub name: String,
    /// Hex SHA-256 of the content.
    pub sha256: String,
    #[serde(default)]
    pub size: u64,
}

/// Blob references keyed by lowercased hex digest.
#[derive(Debug, Clone, Default)]
pub struct BlobIndex {
    entries: HashMap<String, BlobReference>,
}

impl BlobIndex {
    pub fn new(refs: impl IntoIterator<Item = BlobReference>) -> Self {
        let entries = refs
            .into_iter()
            .map(|r| (r.sha256.to_ascii_lowercase(), r))
            .collect();
        Self { entries }
    }

    pub fn get(&self, digest_hex: &str) -> Option<&BlobReference> {
        self.entries.get(&digest_hex.to_ascii_lowercase())
    }

    pub fn require(&self, digest_hex: &str) -> Result<&BlobReference, ImageError> {
        self.get(digest_hex).ok_or_else(|| ImageError::MissingBlob {
            digest: digest_hex.to_string(),
        })
    }

    /// Resolve the config and every layer of `manifest`, layers in manifest order
    /// paired with their digest. Fails on the first digest with no entry.
    pub fn require_all(
        &self,
        manifest: &ImageManifest,
    ) -> Result<(&BlobReference, Vec<(String, &BlobReference)>), ImageError> {
        let config = self.require(&manifest.config.sha256()?)?;
        let layers = manifest
            .layer_digests()?
            .into_iter()
            .map(|hex| {
                let blob = self.require(&hex)?;
                Ok((hex, blob))
            })
            .collect::<Result<Vec<_>, ImageError>>()?;
        Ok((config, layers))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<BlobReference> for BlobIndex {
    fn from_iter<I: IntoIterator<Item = BlobReference>>(iter: I) -> Self {
        Self::new(iter)
    }
}
