use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metaver_lib::{
    CoordinatorBuilder, Environment, FileTimestampStore, FilesystemFetcher, Manifest,
    MemoryFetcher, MemoryTimestampStore, MetadataAdmin, MetadataCoordinator, MetadataError,
    MetadataFetcher, MetadataScope, StalenessTracker, StalenessWatcher, TimestampStore,
    VersionRegistry, DEFAULT_TIMESTAMP_TTL,
};
use tokio::sync::broadcast;

/// One simulated server process: its own coordinator and tracker over
/// storage shared with the others.
struct Process {
    coordinator: Arc<MetadataCoordinator>,
    tracker: Arc<StalenessTracker>,
    admin: MetadataAdmin,
}

async fn process(
    shared: Arc<dyn MetadataFetcher>,
    app: Arc<dyn MetadataFetcher>,
    store: Arc<dyn TimestampStore>,
    clock: Arc<AtomicI64>,
) -> Process {
    let coordinator = Arc::new(
        CoordinatorBuilder::new()
            .app_name("shop")
            .shared_fetcher(shared)
            .app_fetcher(app)
            .build()
            .await
            .unwrap(),
    );
    let tracker = Arc::new(
        StalenessTracker::new(store, "shop").with_clock(move || clock.load(Ordering::SeqCst)),
    );
    let admin = MetadataAdmin::new(coordinator.clone(), tracker.clone());
    Process {
        coordinator,
        tracker,
        admin,
    }
}

async fn memory_backends() -> (Arc<MemoryFetcher>, Arc<MemoryFetcher>) {
    let registry = VersionRegistry::new(["1.0"], ["1.0"]).unwrap();
    (
        Arc::new(MemoryFetcher::with_registry(&registry).await.unwrap()),
        Arc::new(MemoryFetcher::with_registry(&registry).await.unwrap()),
    )
}

#[tokio::test]
async fn test_edit_on_one_process_reaches_the_other() {
    let (shared, app) = memory_backends().await;
    let store: Arc<dyn TimestampStore> = Arc::new(MemoryTimestampStore::new());
    let clock = Arc::new(AtomicI64::new(100));

    let editor = process(shared.clone(), app.clone(), store.clone(), clock.clone()).await;
    let server = process(shared, app, store, clock.clone()).await;
    editor.admin.refresh().await.unwrap();

    let watcher = StalenessWatcher::new(
        server.coordinator.clone(),
        server.tracker.clone(),
        Duration::from_secs(30),
    );
    assert!(!watcher.check_and_reload(MetadataScope::App).await.unwrap());

    clock.store(101, Ordering::SeqCst);
    editor
        .admin
        .set_metadata_json(MetadataScope::App, "Foo", &serde_json::json!({"v": 1}), "1.0")
        .await
        .unwrap();

    assert!(!server.tracker.is_up_to_date(MetadataScope::App).await);
    assert!(server.tracker.is_up_to_date(MetadataScope::Shared).await);
    // Still stale until the server reloads.
    assert!(!server.tracker.is_up_to_date(MetadataScope::App).await);

    assert!(watcher.check_and_reload(MetadataScope::App).await.unwrap());
    let snapshot = server.coordinator.read().await;
    assert!(snapshot.app().manifest_item("Foo", "1.0").is_ok());
    assert!(!watcher.check_and_reload(MetadataScope::App).await.unwrap());
}

#[tokio::test]
async fn test_stale_process_refuses_admin_write() {
    let (shared, app) = memory_backends().await;
    let store: Arc<dyn TimestampStore> = Arc::new(MemoryTimestampStore::new());
    let clock = Arc::new(AtomicI64::new(100));

    let first = process(shared.clone(), app.clone(), store.clone(), clock.clone()).await;
    let second = process(shared, app, store, clock.clone()).await;
    first.admin.refresh().await.unwrap();

    clock.store(105, Ordering::SeqCst);
    first
        .admin
        .create_version(MetadataScope::Shared, "1.1", false)
        .await
        .unwrap();

    let err = second
        .admin
        .create_version(MetadataScope::Shared, "1.2", false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MetadataError::StaleWriteRefused(MetadataScope::Shared)
    ));

    second.admin.refresh().await.unwrap();
    second
        .admin
        .create_version(MetadataScope::Shared, "1.2", false)
        .await
        .unwrap();
    let snapshot = second.coordinator.read().await;
    assert!(snapshot.shared().is_version_known("1.1"));
    assert!(snapshot.shared().is_version_known("1.2"));
}

#[tokio::test]
async fn test_watch_loop_reloads_and_stops_on_shutdown() {
    let (shared, app) = memory_backends().await;
    let store: Arc<dyn TimestampStore> = Arc::new(MemoryTimestampStore::new());
    let clock = Arc::new(AtomicI64::new(100));

    let editor = process(shared.clone(), app.clone(), store.clone(), clock.clone()).await;
    let server = process(shared, app, store, clock.clone()).await;
    editor.admin.refresh().await.unwrap();

    let reloads = Arc::new(AtomicUsize::new(0));
    let counter = reloads.clone();
    let watcher = Arc::new(
        StalenessWatcher::new(
            server.coordinator.clone(),
            server.tracker.clone(),
            Duration::from_millis(10),
        )
        .on_reload(move |_, result| {
            if result.is_ok() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = watcher.clone().spawn(MetadataScope::App, shutdown_tx.subscribe());

    clock.store(101, Ordering::SeqCst);
    editor
        .admin
        .set_metadata_json(MetadataScope::App, "Foo", &"bar", "1.0")
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while reloads.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let snapshot = server.coordinator.read().await;
    assert_eq!(
        snapshot
            .get_metadata_json(MetadataScope::App, "Foo", "1.0")
            .await
            .unwrap(),
        "\"bar\""
    );

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_watch_loop_survives_failed_reload() {
    let (shared, app) = memory_backends().await;
    let store: Arc<dyn TimestampStore> = Arc::new(MemoryTimestampStore::new());
    let clock = Arc::new(AtomicI64::new(100));

    let editor = process(shared.clone(), app.clone(), store.clone(), clock.clone()).await;
    let server = process(shared, app.clone(), store, clock.clone()).await;
    editor.admin.refresh().await.unwrap();

    let watcher = StalenessWatcher::new(
        server.coordinator.clone(),
        server.tracker.clone(),
        Duration::from_secs(30),
    );

    clock.store(101, Ordering::SeqCst);
    editor
        .admin
        .create_version(MetadataScope::App, "1.1", false)
        .await
        .unwrap();

    let generation = server.coordinator.read().await.generation();
    app.set_fail_reads(true);
    assert!(watcher.check_and_reload(MetadataScope::App).await.is_err());
    assert_eq!(server.coordinator.read().await.generation(), generation);
    assert!(!server.tracker.is_up_to_date(MetadataScope::App).await);

    app.set_fail_reads(false);
    assert!(watcher.check_and_reload(MetadataScope::App).await.unwrap());
    assert!(server.coordinator.read().await.app().is_version_known("1.1"));
}

#[tokio::test]
async fn test_filesystem_processes_converge() {
    let dir = tempfile::tempdir().unwrap();
    let shared_root = dir.path().join("shared");
    let app_root = dir.path().join("shop");
    let seed = VersionRegistry::new(["1.0"], ["1.0"]).unwrap();
    for root in [&shared_root, &app_root] {
        let fetcher = FilesystemFetcher::new(root, Environment::Local);
        fetcher.set_version_registry(&seed).await.unwrap();
        fetcher
            .set_manifest(&Default::default(), "1.0")
            .await
            .unwrap();
    }

    let fetchers = || -> (Arc<dyn MetadataFetcher>, Arc<dyn MetadataFetcher>) {
        (
            Arc::new(FilesystemFetcher::new(&shared_root, Environment::Local)),
            Arc::new(FilesystemFetcher::new(&app_root, Environment::Local)),
        )
    };
    let store: Arc<dyn TimestampStore> = Arc::new(FileTimestampStore::new(dir.path().join("ts")));
    let clock = Arc::new(AtomicI64::new(100));

    let (s, a) = fetchers();
    let editor = process(s, a, store.clone(), clock.clone()).await;
    let (s, a) = fetchers();
    let server = process(s, a, store, clock.clone()).await;
    editor.admin.refresh().await.unwrap();

    clock.store(101, Ordering::SeqCst);
    editor
        .admin
        .create_version(MetadataScope::App, "2.0", false)
        .await
        .unwrap();
    editor
        .admin
        .set_metadata_json(MetadataScope::App, "Banner", &serde_json::json!({"text": "hi"}), "2.0")
        .await
        .unwrap();
    editor
        .admin
        .set_current_versions(MetadataScope::App, ["2.0"])
        .await
        .unwrap();

    assert!(app_root.join("2.0").join("Banner.json").exists());
    assert!(app_root.join("2.0").join("Manifest.json").exists());

    let watcher = StalenessWatcher::new(
        server.coordinator.clone(),
        server.tracker.clone(),
        Duration::from_secs(30),
    );
    assert!(watcher.check_and_reload(MetadataScope::App).await.unwrap());

    let snapshot = server.coordinator.read().await;
    assert_eq!(snapshot.app().current_versions(), ["2.0"]);
    assert_eq!(snapshot.app().cached_keys("2.0").unwrap(), vec!["Banner"]);
    let raw = server
        .admin
        .raw_content(MetadataScope::App, "Banner", "2.0")
        .await
        .unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&raw).unwrap()["text"],
        "hi"
    );
}

/// Stands in for another process that publishes a change to `key` while
/// this process is in the middle of saving a manifest.
struct MarkDuringManifestWrite {
    inner: Arc<MemoryFetcher>,
    store: Arc<dyn TimestampStore>,
    clock: Arc<AtomicI64>,
    key: &'static str,
}

#[async_trait]
impl MetadataFetcher for MarkDuringManifestWrite {
    async fn get_item_json(&self, key: &str, version: &str) -> metaver_lib::Result<String> {
        self.inner.get_item_json(key, version).await
    }

    async fn get_version_registry(&self) -> metaver_lib::Result<VersionRegistry> {
        self.inner.get_version_registry().await
    }

    async fn get_manifest(&self, version: &str) -> metaver_lib::Result<Manifest> {
        self.inner.get_manifest(version).await
    }

    async fn set_item_json(&self, key: &str, json: &str, version: &str) -> metaver_lib::Result<()> {
        self.inner.set_item_json(key, json, version).await
    }

    async fn set_manifest(&self, manifest: &Manifest, version: &str) -> metaver_lib::Result<()> {
        let now = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.store
            .write(self.key, &now.to_string(), DEFAULT_TIMESTAMP_TTL)
            .await?;
        self.inner.set_manifest(manifest, version).await
    }

    async fn set_version_registry(&self, registry: &VersionRegistry) -> metaver_lib::Result<()> {
        self.inner.set_version_registry(registry).await
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

async fn process_marking_during_write(key: &'static str) -> Process {
    let (shared, app) = memory_backends().await;
    let store: Arc<dyn TimestampStore> = Arc::new(MemoryTimestampStore::new());
    let clock = Arc::new(AtomicI64::new(100));
    let app = Arc::new(MarkDuringManifestWrite {
        inner: app,
        store: store.clone(),
        clock: clock.clone(),
        key,
    });
    let p = process(shared, app, store, clock).await;
    p.admin.refresh().await.unwrap();
    p
}

#[tokio::test]
async fn test_mark_on_other_scope_during_write_stays_stale() {
    let p = process_marking_during_write("lastUpdated:shared").await;

    p.admin
        .set_metadata_json(MetadataScope::App, "Foo", &serde_json::json!({"v": 1}), "1.0")
        .await
        .unwrap();

    assert!(!p.tracker.is_up_to_date(MetadataScope::Shared).await);
    assert!(p.tracker.is_up_to_date(MetadataScope::App).await);
}

#[tokio::test]
async fn test_mark_on_same_scope_during_write_stays_stale() {
    let p = process_marking_during_write("lastUpdated:shop").await;

    p.admin
        .set_metadata_json(MetadataScope::App, "Foo", &serde_json::json!({"v": 1}), "1.0")
        .await
        .unwrap();

    assert!(!p.tracker.is_up_to_date(MetadataScope::App).await);
    assert!(matches!(
        p.admin
            .set_metadata_json(MetadataScope::App, "Bar", &1, "1.0")
            .await,
        Err(MetadataError::StaleWriteRefused(MetadataScope::App))
    ));

    p.admin.refresh().await.unwrap();
    p.admin
        .set_metadata_json(MetadataScope::App, "Bar", &1, "1.0")
        .await
        .unwrap();
}
