pub mod file;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use file::FileTimestampStore;
pub use memory::MemoryTimestampStore;

/// A key-value store shared by every process serving the same metadata.
///
/// Only the narrow read/write/ping surface needed for staleness detection.
/// Values expire after their TTL; an expired key reads as missing.
#[async_trait]
pub trait TimestampStore: Send + Sync {
    /// Value of `key`, or `None` if it was never written or has expired.
    async fn read(&self, key: &str) -> Result<Option<String>>;

    async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<()>;

    fn describe(&self) -> String;
}
