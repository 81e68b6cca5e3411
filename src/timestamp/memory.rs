use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::TimestampStore;
use crate::error::{MetadataError, Result};

/// Process-local timestamp store backed by a `RwLock<HashMap>`.
///
/// Shared between coordinators in the same process by cloning an `Arc`.
/// Can be switched offline to simulate an unreachable store.
pub struct MemoryTimestampStore {
    data: RwLock<HashMap<String, (String, Instant)>>,
    offline: AtomicBool,
}

impl Default for MemoryTimestampStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTimestampStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MetadataError::TimestampStore("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TimestampStore for MemoryTimestampStore {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        self.check_online()?;
        let data = self.data.read().await;
        Ok(data
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_online()?;
        let now = Instant::now();
        // Clamp to a far-future deadline when `ttl` would overflow the clock.
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 60 * 60));
        let mut data = self.data.write().await;
        data.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
