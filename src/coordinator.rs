use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::{MetadataError, Result};
use crate::fetcher::MetadataFetcher;
use crate::item::MetadataItem;
use crate::scope::{Environment, MetadataScope};
use crate::space::MetadataSpace;

/// One generation of metadata: both scopes, loaded together.
///
/// A snapshot is never changed once readers can see it. Readers keep using
/// the `Arc` they were handed for as long as they like.
#[derive(Clone)]
pub struct Snapshot {
    generation: u64,
    shared: MetadataSpace,
    app: MetadataSpace,
}

impl Snapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn space(&self, scope: MetadataScope) -> &MetadataSpace {
        match scope {
            MetadataScope::Shared => &self.shared,
            MetadataScope::App => &self.app,
        }
    }

    pub fn space_mut(&mut self, scope: MetadataScope) -> &mut MetadataSpace {
        match scope {
            MetadataScope::Shared => &mut self.shared,
            MetadataScope::App => &mut self.app,
        }
    }

    pub fn shared(&self) -> &MetadataSpace {
        &self.shared
    }

    pub fn app(&self) -> &MetadataSpace {
        &self.app
    }

    pub async fn get_metadata_json(
        &self,
        scope: MetadataScope,
        key: &str,
        version: &str,
    ) -> Result<String> {
        self.space(scope).get_metadata_json(key, version).await
    }

    pub async fn get_item<T: MetadataItem>(&self, version: &str) -> Result<T> {
        self.space(T::SCOPE).get_item::<T>(version).await
    }

    pub fn is_hash_current(
        &self,
        scope: MetadataScope,
        key: &str,
        hash: &str,
        version: &str,
    ) -> Result<bool> {
        self.space(scope).is_hash_current(key, hash, version)
    }
}

/// Where snapshots are loaded from.
struct SnapshotSources {
    shared: Arc<dyn MetadataFetcher>,
    app: Arc<dyn MetadataFetcher>,
    environment: Environment,
}

impl SnapshotSources {
    async fn load(&self, generation: u64) -> Result<Snapshot> {
        let (shared, app) = tokio::try_join!(
            MetadataSpace::load(MetadataScope::Shared, self.shared.clone(), self.environment),
            MetadataSpace::load(MetadataScope::App, self.app.clone(), self.environment),
        )?;
        Ok(Snapshot {
            generation,
            shared,
            app,
        })
    }
}

/// Builder for [`MetadataCoordinator`].
///
/// ```no_run
/// # async fn demo() -> metaver_lib::Result<()> {
/// use std::sync::Arc;
/// use metaver_lib::{CoordinatorBuilder, Environment, FilesystemFetcher};
///
/// let coordinator = CoordinatorBuilder::new()
///     .app_name("shop")
///     .environment(Environment::Production)
///     .shared_fetcher(Arc::new(FilesystemFetcher::new("/srv/meta/shared", Environment::Production)))
///     .app_fetcher(Arc::new(FilesystemFetcher::new("/srv/meta/shop", Environment::Production)))
///     .build()
///     .await?;
/// let snapshot = coordinator.read().await;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct CoordinatorBuilder {
    shared: Option<Arc<dyn MetadataFetcher>>,
    app: Option<Arc<dyn MetadataFetcher>>,
    app_name: Option<String>,
    environment: Environment,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared_fetcher(mut self, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        self.shared = Some(fetcher);
        self
    }

    pub fn app_fetcher(mut self, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        self.app = Some(fetcher);
        self
    }

    pub fn app_name(mut self, name: &str) -> Self {
        self.app_name = Some(name.to_string());
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Load the first snapshot. Fails with
    /// [`MetadataError::InitializationFailure`] when either scope cannot be
    /// loaded or has no fetcher.
    pub async fn build(self) -> Result<MetadataCoordinator> {
        let unset = |scope: MetadataScope| MetadataError::InitializationFailure {
            scope,
            source: Box::new(MetadataError::fetcher(scope.as_str(), "no fetcher configured")),
        };
        let sources = SnapshotSources {
            shared: self.shared.ok_or_else(|| unset(MetadataScope::Shared))?,
            app: self.app.ok_or_else(|| unset(MetadataScope::App))?,
            environment: self.environment,
        };
        let app_name = self.app_name.unwrap_or_else(|| "app".to_string());

        let snapshot = sources.load(1).await?;
        info!(
            app = %app_name,
            environment = ?self.environment,
            shared_source = %sources.shared.describe(),
            app_source = %sources.app.describe(),
            "metadata loaded"
        );

        Ok(MetadataCoordinator {
            current: RwLock::new(Arc::new(snapshot)),
            sources,
            app_name,
        })
    }
}

/// Owns the published [`Snapshot`] and the single-writer lock guarding it.
///
/// Readers call [`read`](Self::read) and get the current snapshot without
/// holding any lock afterwards. Writers call [`begin_write`](Self::begin_write),
/// which blocks readers and other writers, reloads everything from the
/// fetchers, and hands back a guard over the fresh snapshot. Dropping the
/// guard releases the lock.
pub struct MetadataCoordinator {
    current: RwLock<Arc<Snapshot>>,
    sources: SnapshotSources,
    app_name: String,
}

impl MetadataCoordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn environment(&self) -> Environment {
        self.sources.environment
    }

    /// The currently published snapshot.
    pub async fn read(&self) -> Arc<Snapshot> {
        self.current.read().await.clone()
    }

    /// Take the write lock and publish a freshly loaded snapshot.
    ///
    /// If the reload fails the lock is released and the previous snapshot
    /// stays published.
    pub async fn begin_write(&self) -> Result<WriteGuard<'_>> {
        let mut slot = self.current.write().await;
        let generation = slot.generation + 1;
        let snapshot = self.sources.load(generation).await?;
        *slot = Arc::new(snapshot);
        debug!(generation, "began metadata write");
        Ok(WriteGuard { slot })
    }

    /// Reload both scopes and publish the result. Returns the new generation.
    pub async fn reload(&self) -> Result<u64> {
        let guard = self.begin_write().await?;
        let generation = guard.generation();
        guard.end();
        Ok(generation)
    }
}

/// Exclusive access to the published snapshot.
///
/// Mutations go to the snapshot published by [`MetadataCoordinator::begin_write`].
/// Readers are blocked until the guard is ended or dropped, so they only
/// ever see it whole.
pub struct WriteGuard<'a> {
    slot: RwLockWriteGuard<'a, Arc<Snapshot>>,
}

impl WriteGuard<'_> {
    /// Release the write lock.
    pub fn end(self) {
        debug!(generation = self.slot.generation, "ended metadata write");
    }
}

impl Deref for WriteGuard<'_> {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.slot
    }
}

impl DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Snapshot {
        // Only the slot holds this Arc while the lock is held, so no clone
        // happens here.
        Arc::make_mut(&mut self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::MemoryFetcher;
    use crate::registry::VersionRegistry;

    async fn coordinator() -> (Arc<MemoryFetcher>, MetadataCoordinator) {
        let registry = VersionRegistry::new(["1.0"], ["1.0"]).unwrap();
        let shared = Arc::new(MemoryFetcher::with_registry(&registry).await.unwrap());
        let app = Arc::new(MemoryFetcher::with_registry(&registry).await.unwrap());
        let coordinator = CoordinatorBuilder::new()
            .app_name("shop")
            .shared_fetcher(shared)
            .app_fetcher(app.clone())
            .build()
            .await
            .unwrap();
        (app, coordinator)
    }

    #[tokio::test]
    async fn test_build_requires_fetchers() {
        let result = CoordinatorBuilder::new().build().await;
        assert!(matches!(
            result,
            Err(MetadataError::InitializationFailure { scope: MetadataScope::Shared, .. })
        ));
    }

    #[tokio::test]
    async fn test_reload_bumps_generation() {
        let (_, coordinator) = coordinator().await;
        let before = coordinator.read().await;
        assert_eq!(before.generation(), 1);
        assert_eq!(coordinator.reload().await.unwrap(), 2);
        assert_eq!(coordinator.read().await.generation(), 2);
        assert_eq!(before.generation(), 1);
    }

    #[tokio::test]
    async fn test_failed_begin_write_keeps_previous_snapshot() {
        let (app, coordinator) = coordinator().await;
        app.set_fail_reads(true);
        assert!(coordinator.begin_write().await.is_err());
        app.set_fail_reads(false);

        assert_eq!(coordinator.read().await.generation(), 1);
        // The lock was released on the error path.
        assert!(coordinator.begin_write().await.is_ok());
    }

    #[tokio::test]
    async fn test_guard_mutations_visible_after_end() {
        let (_, coordinator) = coordinator().await;
        let mut guard = coordinator.begin_write().await.unwrap();
        guard
            .space_mut(MetadataScope::App)
            .create_version("1.1", false)
            .await
            .unwrap();
        guard.end();

        let snapshot = coordinator.read().await;
        assert!(snapshot.app().is_version_known("1.1"));
        assert!(!snapshot.shared().is_version_known("1.1"));
    }
}
