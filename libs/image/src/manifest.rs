//! Registry image manifest (schema 2).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ImageError;

const DIGEST_ALGORITHM: &str = "sha256";

/// Image manifest as served by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    pub config: LayerRef,
    #[serde(default)]
    pub layers: Vec<LayerRef>,
}

/// Content descriptor for the config or one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerRef {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    pub digest: String,
}

impl ImageManifest {
    /// Decode a manifest body.
    pub fn from_slice(body: &[u8]) -> Result<Self, ImageError> {
        serde_json::from_slice(body).map_err(|e| ImageError::Manifest(e.to_string()))
    }

    /// Hex digests of the layers, in manifest order.
    pub fn layer_digests(&self) -> Result<Vec<String>, ImageError> {
        self.layers.iter().map(LayerRef::sha256).collect()
    }

    /// How many times each layer digest occurs. The config is not counted.
    pub fn digest_frequency(&self) -> Result<HashMap<String, usize>, ImageError> {
        let mut frequency = HashMap::with_capacity(self.layers.len());
        for layer in &self.layers {
            *frequency.entry(layer.sha256()?).or_insert(0) += 1;
        }
        Ok(frequency)
    }
}

impl LayerRef {
    /// Hex part of `sha256:<hex>`, lowercased.
    pub fn sha256(&self) -> Result<String, ImageError> {
        parse_digest(&self.digest)
    }
}

/// Split `sha256:<hex>` and return the lowercased hex.
pub fn parse_digest(digest: &str) -> Result<String, ImageError> {
    let parts: Vec<&str> = digest.split(':').collect();
    let [algorithm, hex] = parts.as_slice() else {
        return Err(ImageError::InvalidDigest(digest.to_string()));
    };
    if *algorithm != DIGEST_ALGORITHM
        || hex.len() != 64
        || !hex.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(ImageError::InvalidDigest(digest.to_string()));
    }
    Ok(hex.to_ascii_lowercase())
}
