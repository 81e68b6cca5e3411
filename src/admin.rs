use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::coordinator::MetadataCoordinator;
use crate::error::{MetadataError, Result};
use crate::fetcher::validate_key;
use crate::item::{ItemTypeRegistry, MetadataItem};
use crate::scope::MetadataScope;
use crate::staleness::StalenessTracker;

/// Write path for operators.
///
/// Every mutation refuses to run on a stale view, takes the coordinator's
/// write lock (which reloads both scopes), applies the change, publishes,
/// and then marks the scope updated so other processes reload.
pub struct MetadataAdmin {
    coordinator: Arc<MetadataCoordinator>,
    tracker: Arc<StalenessTracker>,
    item_types: Option<Arc<ItemTypeRegistry>>,
}

impl MetadataAdmin {
    pub fn new(coordinator: Arc<MetadataCoordinator>, tracker: Arc<StalenessTracker>) -> Self {
        Self {
            coordinator,
            tracker,
            item_types: None,
        }
    }

    /// Only accept uploads of registered item keys, in their registered
    /// scope, with content that deserializes into the registered type.
    pub fn with_item_types(mut self, item_types: ItemTypeRegistry) -> Self {
        self.item_types = Some(Arc::new(item_types));
        self
    }

    pub fn coordinator(&self) -> &Arc<MetadataCoordinator> {
        &self.coordinator
    }

    pub fn tracker(&self) -> &Arc<StalenessTracker> {
        &self.tracker
    }

    pub fn item_types(&self) -> Option<&ItemTypeRegistry> {
        self.item_types.as_deref()
    }

    /// Reload both scopes and reset the local timestamps. Clears a
    /// [`StaleWriteRefused`](crate::MetadataError::StaleWriteRefused) refusal.
    pub async fn refresh(&self) -> Result<u64> {
        for scope in MetadataScope::ALL {
            // Establishes a baseline for scopes that were never marked.
            self.tracker.is_up_to_date(scope).await;
        }
        let started = self.tracker.now();
        let generation = self.coordinator.reload().await?;
        self.tracker.refresh_local_to(started);
        info!(generation, "metadata refreshed");
        Ok(generation)
    }

    /// Mark `scope` updated after a write whose lock was taken at `started`.
    ///
    /// Local timestamps fall back to `started`, so marks other processes made
    /// while the write ran still read as stale. The edited scope takes its
    /// new mark unless another process marked it during the write.
    async fn publish(&self, scope: MetadataScope, started: i64) -> Result<()> {
        let concurrent = match self.tracker.shared_timestamp(scope).await {
            Ok(Some(shared)) => shared > started,
            Ok(None) => false,
            Err(_) => true,
        };
        let marked = self
            .tracker
            .mark_updated(scope)
            .await
            .map_err(|e| e.in_admin(format!("marking {} metadata updated", scope)))?;

        self.tracker.refresh_local_to(started);
        if concurrent {
            warn!(%scope, "metadata was marked updated during this write, staying stale");
        } else {
            self.tracker.set_local(scope, marked);
        }
        Ok(())
    }

    fn check_item<T: Serialize + ?Sized>(
        &self,
        scope: MetadataScope,
        key: &str,
        content: &T,
    ) -> Result<()> {
        let Some(ref types) = self.item_types else {
            return Ok(());
        };
        let json = serde_json::to_string(content)?;
        types
            .validate(scope, key, &json)
            .map_err(|e| e.in_admin(format!("uploading {} metadata {}", scope, key)))
    }

    pub async fn create_version(
        &self,
        scope: MetadataScope,
        version: &str,
        mark_current: bool,
    ) -> Result<()> {
        self.tracker.ensure_fresh(scope).await?;
        let started = self.tracker.now();
        let mut guard = self.coordinator.begin_write().await?;
        guard
            .space_mut(scope)
            .create_version(version, mark_current)
            .await?;
        guard.end();
        self.publish(scope, started).await
    }

    pub async fn set_current_versions<I>(&self, scope: MetadataScope, versions: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.tracker.ensure_fresh(scope).await?;
        let started = self.tracker.now();
        let mut guard = self.coordinator.begin_write().await?;
        guard.space_mut(scope).set_current_versions(versions).await?;
        guard.end();
        self.publish(scope, started).await
    }

    /// Store `content` under `key` in `version`. Returns the new content hash.
    pub async fn set_metadata_json<T: Serialize + ?Sized>(
        &self,
        scope: MetadataScope,
        key: &str,
        content: &T,
        version: &str,
    ) -> Result<String> {
        self.check_item(scope, key, content)?;
        self.tracker.ensure_fresh(scope).await?;
        let started = self.tracker.now();
        let mut guard = self.coordinator.begin_write().await?;
        let hash = guard
            .space_mut(scope)
            .set_metadata_json(key, content, version)
            .await?;
        guard.end();
        self.publish(scope, started).await?;
        Ok(hash)
    }

    /// Store several items of one version under a single write lock and mark
    /// `scope` updated once. Returns `(key, hash)` for every stored item.
    ///
    /// All items are checked before anything is written. If storing one
    /// fails, the items stored before it stay, the scope is still marked,
    /// and the failure is returned.
    pub async fn set_metadata_json_many<K, V>(
        &self,
        scope: MetadataScope,
        items: &[(K, V)],
        version: &str,
    ) -> Result<Vec<(String, String)>>
    where
        K: AsRef<str>,
        V: Serialize,
    {
        for (key, content) in items {
            let key = key.as_ref();
            validate_key(key).map_err(|e| e.in_admin(format!("uploading {} metadata", scope)))?;
            self.check_item(scope, key, content)?;
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        self.tracker.ensure_fresh(scope).await?;
        let started = self.tracker.now();
        let mut guard = self.coordinator.begin_write().await?;
        let mut stored = Vec::with_capacity(items.len());
        let mut failure: Option<MetadataError> = None;
        for (key, content) in items {
            match guard
                .space_mut(scope)
                .set_metadata_json(key.as_ref(), content, version)
                .await
            {
                Ok(hash) => stored.push((key.as_ref().to_string(), hash)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        guard.end();

        if !stored.is_empty() {
            self.publish(scope, started).await?;
        }
        info!(%scope, version, stored = stored.len(), requested = items.len(), "bulk upload finished");
        match failure {
            Some(e) => Err(e),
            None => Ok(stored),
        }
    }

    pub async fn set_item<T: MetadataItem>(&self, item: &T, version: &str) -> Result<String> {
        self.set_metadata_json(T::SCOPE, T::KEY, item, version).await
    }

    /// Stored payload of `key`, read past the cache.
    pub async fn raw_content(&self, scope: MetadataScope, key: &str, version: &str) -> Result<String> {
        let snapshot = self.coordinator.read().await;
        snapshot.space(scope).raw_content(key, version).await
    }

    /// Stored payload of every item in the manifest of `version`, in manifest
    /// order, read past the cache.
    pub async fn export_version(
        &self,
        scope: MetadataScope,
        version: &str,
    ) -> Result<Vec<(String, String)>> {
        let snapshot = self.coordinator.read().await;
        let space = snapshot.space(scope);
        let manifest = space
            .manifest(version)
            .map_err(|e| e.in_admin(format!("exporting {} version {}", scope, version)))?;

        let mut exported = Vec::with_capacity(manifest.len());
        for item in manifest.items() {
            let json = space.raw_content(&item.key, version).await?;
            exported.push((item.key.clone(), json));
        }
        Ok(exported)
    }
}
