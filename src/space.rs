use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{MetadataError, Result};
use crate::fetcher::{validate_key, MetadataFetcher};
use crate::item::MetadataItem;
use crate::manifest::{content_hash, Manifest, ManifestItem};
use crate::registry::VersionRegistry;
use crate::scope::{Environment, MetadataScope};
use crate::version::AppVersion;

/// Raw JSON payloads of one current version, keyed by item key.
type VersionCache = HashMap<String, String>;

/// Full version, manifest and cache state of one metadata scope.
///
/// Every version listed as current has a cache entry holding every key of
/// its manifest. A space is built once per snapshot by [`MetadataSpace::load`]
/// and only mutated through the admin operations while the coordinator's
/// write lock is held.
#[derive(Clone)]
pub struct MetadataSpace {
    scope: MetadataScope,
    registry: VersionRegistry,
    manifests: HashMap<String, Manifest>,
    cache: HashMap<String, VersionCache>,
    fetcher: Arc<dyn MetadataFetcher>,
    environment: Environment,
}

impl MetadataSpace {
    /// Load the registry, every manifest, and the payloads of every current
    /// version. Any failure is an [`MetadataError::InitializationFailure`].
    pub async fn load(
        scope: MetadataScope,
        fetcher: Arc<dyn MetadataFetcher>,
        environment: Environment,
    ) -> Result<Self> {
        let init = move |source: MetadataError| MetadataError::InitializationFailure {
            scope,
            source: Box::new(source),
        };

        let registry = fetcher.get_version_registry().await.map_err(init)?;

        let mut manifests = HashMap::with_capacity(registry.known_versions().len());
        for version in registry.known_versions() {
            let manifest = fetcher.get_manifest(version).await.map_err(init)?;
            manifests.insert(version.clone(), manifest);
        }

        let mut cache = HashMap::with_capacity(registry.current_versions().len());
        let mut cached_items = 0usize;
        for version in registry.current_versions() {
            let Some(manifest) = manifests.get(version) else {
                return Err(init(MetadataError::InvalidVersion(version.clone())));
            };
            let entries = load_cache(fetcher.as_ref(), manifest, version)
                .await
                .map_err(init)?;
            cached_items += entries.len();
            cache.insert(version.clone(), entries);
        }

        debug!(
            %scope,
            source = %fetcher.describe(),
            versions = registry.known_versions().len(),
            current = registry.current_versions().len(),
            cached_items,
            "loaded metadata space"
        );

        Ok(Self {
            scope,
            registry,
            manifests,
            cache,
            fetcher,
            environment,
        })
    }

    pub fn scope(&self) -> MetadataScope {
        self.scope
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    pub fn known_versions(&self) -> &[String] {
        self.registry.known_versions()
    }

    pub fn current_versions(&self) -> &[String] {
        self.registry.current_versions()
    }

    pub fn latest_version(&self) -> Option<AppVersion> {
        self.registry.latest_version()
    }

    pub fn is_version_known(&self, version: &str) -> bool {
        AppVersion::canonicalize(version).is_ok_and(|v| self.registry.is_known(&v))
    }

    /// Canonicalize `version` and check that it is known.
    fn resolve(&self, version: &str) -> Result<String> {
        let canonical = AppVersion::canonicalize(version)?;
        if !self.registry.is_known(&canonical) {
            return Err(MetadataError::InvalidVersion(canonical));
        }
        Ok(canonical)
    }

    pub fn manifest(&self, version: &str) -> Result<&Manifest> {
        let version = self.resolve(version)?;
        self.manifests
            .get(&version)
            .ok_or(MetadataError::InvalidVersion(version))
    }

    pub fn manifest_item(&self, key: &str, version: &str) -> Result<&ManifestItem> {
        let manifest = self.manifest(version)?;
        manifest
            .item(key)
            .ok_or_else(|| MetadataError::MissingManifestItem {
                key: key.to_string(),
                version: version.to_string(),
            })
    }

    /// Keys held in the cache of a current version, sorted. `None` when the
    /// version has no cache.
    pub fn cached_keys(&self, version: &str) -> Option<Vec<&str>> {
        let version = AppVersion::canonicalize(version).ok()?;
        let entries = self.cache.get(&version)?;
        let mut keys: Vec<&str> = entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        Some(keys)
    }

    /// Raw JSON of an item. Current versions are served from the cache;
    /// everything else goes to the fetcher.
    ///
    /// Fetcher failures are logged and reported as
    /// [`MetadataError::MetadataUnavailable`].
    pub async fn get_metadata_json(&self, key: &str, version: &str) -> Result<String> {
        let version = self.resolve(version)?;

        if self.registry.is_current(&version) {
            if let Some(json) = self.cache.get(&version).and_then(|c| c.get(key)) {
                return Ok(json.clone());
            }
            if self.manifests.get(&version).is_some_and(|m| m.contains(key)) {
                warn!(
                    scope = %self.scope,
                    %version,
                    key,
                    "cached metadata missing for current version, reading from fetcher"
                );
            }
        }

        self.fetcher
            .get_item_json(key, &version)
            .await
            .map_err(|e| {
                error!(
                    scope = %self.scope,
                    %version,
                    key,
                    error = %e,
                    "could not find metadata"
                );
                MetadataError::MetadataUnavailable {
                    key: key.to_string(),
                    version,
                }
            })
    }

    /// Typed read of `T::KEY` in `version`.
    pub async fn get_item<T: MetadataItem>(&self, version: &str) -> Result<T> {
        let json = self.get_metadata_json(T::KEY, version).await?;
        serde_json::from_str(&json).map_err(|e| {
            error!(
                scope = %self.scope,
                version,
                key = T::KEY,
                error = %e,
                "failed to deserialize metadata"
            );
            MetadataError::Serialization(e)
        })
    }

    /// Read an item straight from the fetcher, bypassing the cache. Admin only;
    /// errors are not masked.
    pub async fn raw_content(&self, key: &str, version: &str) -> Result<String> {
        let context = || format!("reading {} metadata {} in version {}", self.scope, key, version);
        let canonical = self.resolve(version).map_err(|e| e.in_admin(context()))?;
        self.fetcher
            .get_item_json(key, &canonical)
            .await
            .map_err(|e| e.in_admin(context()))
    }

    /// True iff the manifest hash of `key` in `version` equals `hash`.
    pub fn is_hash_current(&self, key: &str, hash: &str, version: &str) -> Result<bool> {
        let item = self.manifest_item(key, version)?;
        Ok(item.hash == hash)
    }

    /// Serialize `content`, persist it, and record its hash in the version's
    /// manifest. Returns the new hash.
    ///
    /// Nothing in memory changes unless both the payload and the manifest
    /// were persisted, so the cache and manifest of a current version always
    /// hold the same keys. A failure after the payload was written leaves the
    /// stored payload ahead of the stored manifest until the write is retried.
    pub async fn set_metadata_json<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        content: &T,
        version: &str,
    ) -> Result<String> {
        let context = || format!("saving {} metadata {} in version {}", self.scope, key, version);

        validate_key(key).map_err(|e| e.in_admin(context()))?;
        let canonical = self.resolve(version).map_err(|e| e.in_admin(context()))?;
        let json = self
            .environment
            .to_json(content)
            .map_err(|e| MetadataError::from(e).in_admin(context()))?;

        self.fetcher
            .set_item_json(key, &json, &canonical)
            .await
            .map_err(|e| e.in_admin(context()))?;

        let hash = content_hash(&json);
        let mut manifest = self.manifests.get(&canonical).cloned().unwrap_or_default();
        manifest.set_item(key, hash.clone());
        self.fetcher
            .set_manifest(&manifest, &canonical)
            .await
            .map_err(|e| e.in_admin(format!("{} (payload saved, manifest not updated)", context())))?;

        self.manifests.insert(canonical.clone(), manifest);
        if self.registry.is_current(&canonical) {
            if let Some(entries) = self.cache.get_mut(&canonical) {
                entries.insert(key.to_string(), json);
            }
        }

        info!(scope = %self.scope, version = %canonical, key, %hash, "saved metadata item");
        Ok(hash)
    }

    /// Typed write of `item` under `T::KEY`.
    pub async fn set_item<T: MetadataItem>(&mut self, item: &T, version: &str) -> Result<String> {
        self.set_metadata_json(T::KEY, item, version).await
    }

    /// Replace the current versions and persist the registry.
    ///
    /// Payloads of newly current versions are loaded before anything is
    /// persisted, and caches of versions that stop being current are dropped.
    pub async fn set_current_versions<I>(&mut self, versions: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let context = || format!("updating {} current versions", self.scope);

        let mut next = self.registry.clone();
        next.set_current_versions(versions)
            .map_err(|e| e.in_admin(context()))?;

        let mut loaded = HashMap::new();
        for version in next.current_versions() {
            if self.cache.contains_key(version) {
                continue;
            }
            let manifest = self
                .manifests
                .get(version)
                .ok_or_else(|| MetadataError::InvalidVersion(version.clone()).in_admin(context()))?;
            let entries = load_cache(self.fetcher.as_ref(), manifest, version)
                .await
                .map_err(|e| e.in_admin(context()))?;
            loaded.insert(version.clone(), entries);
        }

        self.fetcher
            .set_version_registry(&next)
            .await
            .map_err(|e| e.in_admin(context()))?;

        self.registry = next;
        self.cache.retain(|version, _| self.registry.is_current(version));
        self.cache.extend(loaded);

        info!(
            scope = %self.scope,
            current = ?self.registry.current_versions(),
            "updated current versions"
        );
        Ok(())
    }

    /// Register a new version with an empty manifest.
    pub async fn create_version(&mut self, version: &str, mark_current: bool) -> Result<()> {
        let context = || format!("creating {} version {}", self.scope, version);

        let canonical = AppVersion::canonicalize(version).map_err(|e| e.in_admin(context()))?;
        let mut next = self.registry.clone();
        next.create_version(&canonical, mark_current)
            .map_err(|e| e.in_admin(context()))?;

        // The manifest goes first: a registry naming a version without a
        // manifest would make every later load fail.
        let manifest = Manifest::new();
        self.fetcher
            .set_manifest(&manifest, &canonical)
            .await
            .map_err(|e| e.in_admin(context()))?;
        self.fetcher
            .set_version_registry(&next)
            .await
            .map_err(|e| e.in_admin(context()))?;

        self.registry = next;
        self.manifests.insert(canonical.clone(), manifest);
        if mark_current {
            self.cache.insert(canonical.clone(), VersionCache::new());
        }

        info!(scope = %self.scope, version = %canonical, mark_current, "created metadata version");
        Ok(())
    }
}

async fn load_cache(
    fetcher: &dyn MetadataFetcher,
    manifest: &Manifest,
    version: &str,
) -> Result<VersionCache> {
    let mut entries = VersionCache::with_capacity(manifest.len());
    for key in manifest.keys() {
        let json = fetcher.get_item_json(key, version).await?;
        entries.insert(key.to_string(), json);
    }
    Ok(entries)
}
