use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    decode_manifest, decode_registry, item_path, manifest_path, validate_key, MetadataFetcher,
    REGISTRY_DOCUMENT,
};
use crate::error::{MetadataError, Result};
use crate::manifest::Manifest;
use crate::registry::VersionRegistry;
use crate::scope::Environment;

/// In-memory metadata storage backed by a `RwLock<HashMap>` of document
/// paths to serialized documents.
///
/// Reads and writes can be switched to fail, and reads are counted, which
/// makes this the backend of choice for exercising cache behavior.
pub struct MemoryFetcher {
    documents: RwLock<HashMap<String, String>>,
    environment: Environment,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
}

impl Default for MemoryFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            environment: Environment::Test,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    /// A store containing just `registry` and an empty manifest for each of
    /// its known versions.
    pub async fn with_registry(registry: &VersionRegistry) -> Result<Self> {
        let fetcher = Self::new();
        fetcher.set_version_registry(registry).await?;
        for version in registry.known_versions() {
            fetcher.set_manifest(&Manifest::new(), version).await?;
        }
        Ok(fetcher)
    }

    /// Store a raw document at `path`, bypassing validation.
    pub async fn insert_document(&self, path: impl Into<String>, content: impl Into<String>) {
        self.documents
            .write()
            .await
            .insert(path.into(), content.into());
    }

    pub async fn document(&self, path: &str) -> Option<String> {
        self.documents.read().await.get(path).cloned()
    }

    pub async fn remove_document(&self, path: &str) -> Option<String> {
        self.documents.write().await.remove(path)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of read operations served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn read(&self, path: &str) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MetadataError::fetcher(path, "injected read failure"));
        }
        self.documents
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| MetadataError::fetcher(path, "no such document"))
    }

    async fn write(&self, path: String, content: String) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MetadataError::fetcher(path, "injected write failure"));
        }
        self.documents.write().await.insert(path, content);
        Ok(())
    }
}

#[async_trait]
impl MetadataFetcher for MemoryFetcher {
    async fn get_item_json(&self, key: &str, version: &str) -> Result<String> {
        validate_key(key)?;
        self.read(&item_path(key, version)).await
    }

    async fn get_version_registry(&self) -> Result<VersionRegistry> {
        let doc = self.read(REGISTRY_DOCUMENT).await?;
        decode_registry(REGISTRY_DOCUMENT, doc.as_bytes())
    }

    async fn get_manifest(&self, version: &str) -> Result<Manifest> {
        let path = manifest_path(version);
        let doc = self.read(&path).await?;
        decode_manifest(&path, doc.as_bytes())
    }

    async fn set_item_json(&self, key: &str, json: &str, version: &str) -> Result<()> {
        validate_key(key)?;
        self.write(item_path(key, version), json.to_string()).await
    }

    async fn set_manifest(&self, manifest: &Manifest, version: &str) -> Result<()> {
        let json = self.environment.to_json(manifest)?;
        self.write(manifest_path(version), json).await
    }

    async fn set_version_registry(&self, registry: &VersionRegistry) -> Result<()> {
        let json = self.environment.to_json(registry)?;
        self.write(REGISTRY_DOCUMENT.to_string(), json).await
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
