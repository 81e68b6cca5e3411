pub mod filesystem;
#[cfg(feature = "remote")]
pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::error::{MetadataError, Result};
use crate::manifest::Manifest;
use crate::registry::VersionRegistry;

pub use filesystem::FilesystemFetcher;
#[cfg(feature = "remote")]
pub use http::HttpFetcher;
pub use memory::MemoryFetcher;

/// Document holding the version registry, relative to a scope root.
pub const REGISTRY_DOCUMENT: &str = "VersionRegistry.json";

/// Per-version manifest document name.
pub const MANIFEST_DOCUMENT: &str = "Manifest.json";

/// Backing-store capability for one metadata scope. Implementations must be
/// thread-safe.
///
/// Layout relative to the scope root:
/// `VersionRegistry.json`, `<version>/Manifest.json`, `<version>/<key>.json`.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Raw JSON payload of an item.
    async fn get_item_json(&self, key: &str, version: &str) -> Result<String>;

    async fn get_version_registry(&self) -> Result<VersionRegistry>;

    async fn get_manifest(&self, version: &str) -> Result<Manifest>;

    /// Persist an item payload. Admin only.
    async fn set_item_json(&self, key: &str, json: &str, version: &str) -> Result<()>;

    /// Persist a version manifest. Admin only.
    async fn set_manifest(&self, manifest: &Manifest, version: &str) -> Result<()>;

    /// Persist the version registry. Admin only.
    async fn set_version_registry(&self, registry: &VersionRegistry) -> Result<()>;

    /// Human-readable location of the backing store, for logs.
    fn describe(&self) -> String;
}

pub(crate) fn item_path(key: &str, version: &str) -> String {
    format!("{}/{}.json", version, key)
}

pub(crate) fn manifest_path(version: &str) -> String {
    format!("{}/{}", version, MANIFEST_DOCUMENT)
}

/// Reject keys that are empty, would resolve outside their version folder,
/// would collide with the version's manifest document, or cannot travel as a
/// single URL path segment.
pub fn validate_key(key: &str) -> Result<()> {
    let manifest_stem = MANIFEST_DOCUMENT.trim_end_matches(".json");
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key.eq_ignore_ascii_case(manifest_stem)
        || key.contains(['/', '\\', '?', '#', '%'])
        || key.chars().any(char::is_control);
    if bad {
        return Err(MetadataError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub(crate) fn decode_registry(location: &str, bytes: &[u8]) -> Result<VersionRegistry> {
    let registry: VersionRegistry = serde_json::from_slice(bytes)
        .map_err(|e| MetadataError::fetcher(location, format!("malformed version registry: {}", e)))?;
    registry.validated()
}

pub(crate) fn decode_manifest(location: &str, bytes: &[u8]) -> Result<Manifest> {
    serde_json::from_slice(bytes)
        .map_err(|e| MetadataError::fetcher(location, format!("malformed manifest: {}", e)))
}
