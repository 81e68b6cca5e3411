use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{
    decode_manifest, decode_registry, item_path, manifest_path, validate_key, MetadataFetcher,
    REGISTRY_DOCUMENT,
};
use crate::error::{MetadataError, Result};
use crate::manifest::Manifest;
use crate::registry::VersionRegistry;
use crate::scope::Environment;

/// Metadata stored as plain files under a local directory.
pub struct FilesystemFetcher {
    root: PathBuf,
    environment: Environment,
}

impl FilesystemFetcher {
    pub fn new(root: impl Into<PathBuf>, environment: Environment) -> Self {
        Self {
            root: root.into(),
            environment,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.root.join(relative);
        tokio::fs::read(&path)
            .await
            .map_err(|e| MetadataError::fetcher(path.display().to_string(), e))
    }

    async fn write(&self, relative: &str, content: &[u8]) -> Result<()> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MetadataError::fetcher(parent.display().to_string(), e))?;
        }
        // Write to a sibling temp file first so readers in other processes
        // never observe a half-written document.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| MetadataError::fetcher(tmp.display().to_string(), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| MetadataError::fetcher(path.display().to_string(), e))
    }
}

#[async_trait]
impl MetadataFetcher for FilesystemFetcher {
    async fn get_item_json(&self, key: &str, version: &str) -> Result<String> {
        validate_key(key)?;
        let relative = item_path(key, version);
        let bytes = self.read(&relative).await?;
        String::from_utf8(bytes).map_err(|e| MetadataError::fetcher(relative, e))
    }

    async fn get_version_registry(&self) -> Result<VersionRegistry> {
        let bytes = self.read(REGISTRY_DOCUMENT).await?;
        decode_registry(REGISTRY_DOCUMENT, &bytes)
    }

    async fn get_manifest(&self, version: &str) -> Result<Manifest> {
        let relative = manifest_path(version);
        let bytes = self.read(&relative).await?;
        decode_manifest(&relative, &bytes)
    }

    async fn set_item_json(&self, key: &str, json: &str, version: &str) -> Result<()> {
        validate_key(key)?;
        self.write(&item_path(key, version), json.as_bytes()).await
    }

    async fn set_manifest(&self, manifest: &Manifest, version: &str) -> Result<()> {
        let json = self.environment.to_json(manifest)?;
        self.write(&manifest_path(version), json.as_bytes()).await
    }

    async fn set_version_registry(&self, registry: &VersionRegistry) -> Result<()> {
        let json = self.environment.to_json(registry)?;
        self.write(REGISTRY_DOCUMENT, json.as_bytes()).await
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
