use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::coordinator::MetadataCoordinator;
use crate::error::{MetadataError, Result};
use crate::scope::MetadataScope;
use crate::timestamp::TimestampStore;

/// Source of "now" in unix seconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Lifetime of a shared timestamp entry.
pub const DEFAULT_TIMESTAMP_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Compares this process's view of each scope against the shared
/// `lastUpdated:<scope>` timestamps.
pub struct StalenessTracker {
    store: Arc<dyn TimestampStore>,
    app_name: String,
    local: [AtomicI64; 2],
    clock: Clock,
    ttl: Duration,
}

impl StalenessTracker {
    pub fn new(store: Arc<dyn TimestampStore>, app_name: &str) -> Self {
        let clock: Clock = Arc::new(|| chrono::Utc::now().timestamp());
        let now = clock();
        Self {
            store,
            app_name: app_name.to_string(),
            local: [AtomicI64::new(now), AtomicI64::new(now)],
            clock,
            ttl: DEFAULT_TIMESTAMP_TTL,
        }
    }

    /// Replace the clock and reset both local timestamps to its current value.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self.refresh_local();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<dyn TimestampStore> {
        &self.store
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    /// `lastUpdated:shared` or `lastUpdated:<app name>`.
    pub fn timestamp_key(&self, scope: MetadataScope) -> String {
        match scope {
            MetadataScope::Shared => "lastUpdated:shared".to_string(),
            MetadataScope::App => format!("lastUpdated:{}", self.app_name),
        }
    }

    pub fn local_timestamp(&self, scope: MetadataScope) -> i64 {
        self.local[scope.index()].load(Ordering::SeqCst)
    }

    /// Reset both local timestamps to now.
    pub fn refresh_local(&self) {
        self.refresh_local_to(self.now());
    }

    pub(crate) fn refresh_local_to(&self, timestamp: i64) {
        for slot in &self.local {
            slot.store(timestamp, Ordering::SeqCst);
        }
    }

    pub(crate) fn set_local(&self, scope: MetadataScope, timestamp: i64) {
        self.local[scope.index()].store(timestamp, Ordering::SeqCst);
    }

    /// Record that `scope` changed now. Returns the timestamp written.
    pub async fn mark_updated(&self, scope: MetadataScope) -> Result<i64> {
        let now = self.now();
        let key = self.timestamp_key(scope);
        self.store.write(&key, &now.to_string(), self.ttl).await?;
        debug!(%scope, key, timestamp = now, "marked metadata updated");
        Ok(now)
    }

    /// Shared timestamp of `scope`, or `None` when it is not set.
    pub async fn shared_timestamp(&self, scope: MetadataScope) -> Result<Option<i64>> {
        let key = self.timestamp_key(scope);
        let Some(raw) = self.store.read(&key).await? else {
            return Ok(None);
        };
        raw.trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| MetadataError::TimestampStore(format!("{}: {:?}: {}", key, raw, e)))
    }

    /// False when another process has marked `scope` updated since this
    /// process last reloaded, or when freshness cannot be established.
    ///
    /// A missing shared timestamp is written as a baseline and reported as
    /// stale once; the local timestamp of `scope` takes the baseline value, so
    /// an immediate second call reports fresh.
    pub async fn is_up_to_date(&self, scope: MetadataScope) -> bool {
        match self.shared_timestamp(scope).await {
            Ok(Some(shared)) => shared <= self.local_timestamp(scope),
            Ok(None) => {
                warn!(%scope, "no shared timestamp, writing baseline and treating as stale");
                match self.mark_updated(scope).await {
                    Ok(baseline) => self.set_local(scope, baseline),
                    Err(e) => error!(%scope, error = %e, "failed to write baseline timestamp"),
                }
                false
            }
            Err(e) => {
                error!(%scope, error = %e, "failed to read shared timestamp");
                false
            }
        }
    }

    /// Refuse to proceed when this process's view of `scope` is stale.
    pub async fn ensure_fresh(&self, scope: MetadataScope) -> Result<()> {
        if self.is_up_to_date(scope).await {
            Ok(())
        } else {
            Err(MetadataError::StaleWriteRefused(scope))
        }
    }
}

/// Called after every reload attempt made by a watcher.
pub type ReloadCallback = Arc<dyn Fn(MetadataScope, &Result<u64>) + Send + Sync>;

/// Polls the shared timestamp of one scope and reloads the coordinator when
/// another process has published a change.
pub struct StalenessWatcher {
    coordinator: Arc<MetadataCoordinator>,
    tracker: Arc<StalenessTracker>,
    interval: Duration,
    on_reload: Option<ReloadCallback>,
}

impl StalenessWatcher {
    pub fn new(
        coordinator: Arc<MetadataCoordinator>,
        tracker: Arc<StalenessTracker>,
        interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            tracker,
            interval: interval.max(Duration::from_millis(1)),
            on_reload: None,
        }
    }

    pub fn on_reload(
        mut self,
        callback: impl Fn(MetadataScope, &Result<u64>) + Send + Sync + 'static,
    ) -> Self {
        self.on_reload = Some(Arc::new(callback));
        self
    }

    /// Reload when `scope` is stale. Returns whether a reload happened.
    ///
    /// Both local timestamps are reset to the time the reload started, so a
    /// mark made while the reload was running is picked up on the next check.
    pub async fn check_and_reload(&self, scope: MetadataScope) -> Result<bool> {
        if self.tracker.is_up_to_date(scope).await {
            return Ok(false);
        }

        info!(%scope, "metadata is stale, reloading");
        let started = self.tracker.now();
        let result = self.coordinator.reload().await;
        if let Some(ref callback) = self.on_reload {
            callback(scope, &result);
        }
        let generation = result?;

        self.tracker.refresh_local_to(started);
        info!(%scope, generation, "metadata reloaded");
        Ok(true)
    }

    /// Check immediately, then on every tick, until `shutdown` fires or its
    /// sender is dropped. A failed reload keeps the current snapshot and is
    /// retried on the next tick.
    pub async fn run(&self, scope: MetadataScope, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(%scope, interval_secs = self.interval.as_secs_f64(), "staleness watcher started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_and_reload(scope).await {
                        error!(%scope, error = %e, "metadata reload failed, keeping current snapshot");
                    }
                }
                _ = shutdown.recv() => {
                    info!(%scope, "staleness watcher stopped");
                    break;
                }
            }
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        scope: MetadataScope,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(scope, shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::MemoryTimestampStore;

    fn fixed_clock(start: i64) -> (Arc<AtomicI64>, impl Fn() -> i64 + Send + Sync + 'static) {
        let now = Arc::new(AtomicI64::new(start));
        let handle = now.clone();
        (handle, move || now.load(Ordering::SeqCst))
    }

    #[test]
    fn test_timestamp_keys() {
        let tracker = StalenessTracker::new(Arc::new(MemoryTimestampStore::new()), "shop");
        assert_eq!(tracker.timestamp_key(MetadataScope::Shared), "lastUpdated:shared");
        assert_eq!(tracker.timestamp_key(MetadataScope::App), "lastUpdated:shop");
    }

    #[tokio::test]
    async fn test_missing_key_is_stale_once() {
        let store = Arc::new(MemoryTimestampStore::new());
        let (_, clock) = fixed_clock(1_000);
        let tracker = StalenessTracker::new(store.clone(), "shop").with_clock(clock);

        assert!(!tracker.is_up_to_date(MetadataScope::Shared).await);
        assert_eq!(
            store.read("lastUpdated:shared").await.unwrap().as_deref(),
            Some("1000")
        );
        assert!(tracker.is_up_to_date(MetadataScope::Shared).await);
    }

    #[tokio::test]
    async fn test_newer_mark_from_other_process_is_stale() {
        let store = Arc::new(MemoryTimestampStore::new());
        let (now, clock) = fixed_clock(1_000);
        let reader = StalenessTracker::new(store.clone(), "shop").with_clock(clock);
        let (_, later) = fixed_clock(1_005);
        let writer = StalenessTracker::new(store.clone(), "shop").with_clock(later);

        writer.mark_updated(MetadataScope::App).await.unwrap();
        assert!(!reader.is_up_to_date(MetadataScope::App).await);
        assert!(!reader.is_up_to_date(MetadataScope::App).await);

        now.store(1_006, Ordering::SeqCst);
        reader.refresh_local();
        assert!(reader.is_up_to_date(MetadataScope::App).await);
    }

    #[tokio::test]
    async fn test_equal_timestamps_are_fresh() {
        let store = Arc::new(MemoryTimestampStore::new());
        let (_, clock) = fixed_clock(1_000);
        let tracker = StalenessTracker::new(store, "shop").with_clock(clock);
        tracker.mark_updated(MetadataScope::Shared).await.unwrap();
        assert!(tracker.is_up_to_date(MetadataScope::Shared).await);
    }

    #[tokio::test]
    async fn test_unreadable_store_is_stale() {
        let store = Arc::new(MemoryTimestampStore::new());
        let tracker = StalenessTracker::new(store.clone(), "shop");
        tracker.mark_updated(MetadataScope::Shared).await.unwrap();
        store.set_offline(true);
        assert!(!tracker.is_up_to_date(MetadataScope::Shared).await);
        assert!(matches!(
            tracker.ensure_fresh(MetadataScope::Shared).await,
            Err(MetadataError::StaleWriteRefused(MetadataScope::Shared))
        ));
    }

    #[tokio::test]
    async fn test_garbage_timestamp_is_stale() {
        let store = Arc::new(MemoryTimestampStore::new());
        store
            .write("lastUpdated:shop", "yesterday", DEFAULT_TIMESTAMP_TTL)
            .await
            .unwrap();
        let tracker = StalenessTracker::new(store, "shop");
        assert!(!tracker.is_up_to_date(MetadataScope::App).await);
    }
}
