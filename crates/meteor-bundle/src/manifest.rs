//! The `app.json` manifest

use serde::{Deserialize, Serialize};

/// One output resource. Paths are bundle-relative with forward slashes on
/// every platform; `url` is present for client resources only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    #[serde(rename = "where")]
    pub where_: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub cacheable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Resources served to browsers.
pub const WHERE_CLIENT: &str = "client";
/// Resources used by the server program itself.
pub const WHERE_INTERNAL: &str = "internal";

/// The `app.json` document: the ordered server load list, the manifest,
/// and the release the bundle was built with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppManifest {
    pub load: Vec<String>,
    pub manifest: Vec<ManifestEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}

impl AppManifest {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
