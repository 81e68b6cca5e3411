use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::TimestampStore;
use crate::error::{MetadataError, Result};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entry {
    value: String,
    expires_at: i64,
}

/// Timestamp store kept as one small JSON file per key in a directory that
/// every participating process can reach (a local disk for processes on one
/// host, or a network mount).
pub struct FileTimestampStore {
    dir: PathBuf,
}

impl FileTimestampStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

fn store_error(path: &Path, e: impl std::fmt::Display) -> MetadataError {
    MetadataError::TimestampStore(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl TimestampStore for FileTimestampStore {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error(&path, e)),
        };
        let entry: Entry = serde_json::from_slice(&bytes).map_err(|e| store_error(&path, e))?;
        if entry.expires_at <= chrono::Utc::now().timestamp() {
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let entry = Entry {
            value: value.to_string(),
            expires_at: chrono::Utc::now().timestamp().saturating_add(ttl),
        };
        let path = self.path(key);
        let body = serde_json::to_vec(&entry).map_err(|e| store_error(&path, e))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_error(&self.dir, e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| store_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| store_error(&path, e))
    }

    async fn ping(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_error(&self.dir, e))?;
        let meta = tokio::fs::metadata(&self.dir)
            .await
            .map_err(|e| store_error(&self.dir, e))?;
        if meta.permissions().readonly() {
            return Err(store_error(&self.dir, "directory is read-only"));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.dir.display())
    }
}
