use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// One entry of a version manifest: an item key and its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub key: String,
    pub hash: String,
}

/// On-disk form of a manifest: `{"items": [{"key": ..., "hash": ...}]}`.
#[derive(Serialize, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    items: Vec<ManifestItem>,
}

/// Per-version index of item key to content hash.
///
/// Items keep their insertion order for serialization; `index` maps each
/// key to its position for constant-time lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ManifestDocument", into = "ManifestDocument")]
pub struct Manifest {
    items: Vec<ManifestItem>,
    index: HashMap<String, usize>,
}

impl From<ManifestDocument> for Manifest {
    fn from(doc: ManifestDocument) -> Self {
        let mut manifest = Manifest::default();
        for item in doc.items {
            manifest.set_item(item.key, item.hash);
        }
        manifest
    }
}

impl From<Manifest> for ManifestDocument {
    fn from(manifest: Manifest) -> Self {
        ManifestDocument {
            items: manifest.items,
        }
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(&self, key: &str) -> Option<&ManifestItem> {
        self.index.get(key).map(|&i| &self.items[i])
    }

    pub fn items(&self) -> &[ManifestItem] {
        &self.items
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.key.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Update the hash for `key`, appending a new item if the key is new.
    pub fn set_item(&mut self, key: impl Into<String>, hash: impl Into<String>) {
        let key = key.into();
        let hash = hash.into();
        match self.index.get(&key) {
            Some(&i) => self.items[i].hash = hash,
            None => {
                self.index.insert(key.clone(), self.items.len());
                self.items.push(ManifestItem { key, hash });
            }
        }
    }
}

/// Content fingerprint used in manifests: hex-encoded SHA-1 of the payload.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
