//! The `docker save` style layout generic scanners read.

use serde::{Deserialize, Serialize};

/// Name of the top-level manifest inside the archive.
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// One element of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyManifestEntry {
    pub config: String,
    #[serde(rename = "repoTags")]
    pub repo_tags: Vec<String>,
    pub layers: Vec<String>,
}

impl LegacyManifestEntry {
    /// Entry for a config digest and layer digests in manifest order. No tags are set.
    pub fn new<'a>(config_hex: &str, layer_hexes: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            config: config_path(config_hex),
            repo_tags: Vec::new(),
            layers: layer_hexes.into_iter().map(layer_tar_path).collect(),
        }
    }
}

/// `<hex>.json`
pub fn config_path(hex: &str) -> String {
    format!("{hex}.json")
}

/// `<hex>/`
pub fn layer_dir(hex: &str) -> String {
    format!("{hex}/")
}

/// `<hex>/layer.tar`
pub fn layer_tar_path(hex: &str) -> String {
    format!("{hex}/layer.tar")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_json_shape() {
        let entry = LegacyManifestEntry::new("cfg", ["l1", "l2", "l1"]);

        let json = serde_json::to_string(&[entry]).unwrap();

        assert_eq!(
            json,
            r#"[{"config":"cfg.json","repoTags":[],"layers":["l1/layer.tar","l2/layer.tar","l1/layer.tar"]}]"#
        );
    }
}
