use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{MetadataError, Result};
use crate::version::AppVersion;

/// All versions a metadata scope knows about, plus the subset that is
/// currently served from cache.
///
/// Invariant: every entry of `current_versions` is also in `known_versions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRegistry {
    #[serde(default)]
    known_versions: Vec<String>,
    #[serde(default)]
    current_versions: Vec<String>,
}

impl VersionRegistry {
    /// Build a registry from raw version strings, canonicalizing each entry.
    ///
    /// Fails if any entry is malformed or a current version is not known.
    pub fn new<K, C>(known: K, current: C) -> Result<Self>
    where
        K: IntoIterator,
        K::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let mut registry = VersionRegistry::default();
        for version in known {
            let version = AppVersion::canonicalize(version.as_ref())?;
            if !registry.known_versions.contains(&version) {
                registry.known_versions.push(version);
            }
        }
        for version in current {
            let version = AppVersion::canonicalize(version.as_ref())?;
            if !registry.is_known(&version) {
                return Err(MetadataError::InvalidVersion(version));
            }
            if !registry.current_versions.contains(&version) {
                registry.current_versions.push(version);
            }
        }
        Ok(registry)
    }

    /// Re-validate a registry that was deserialized from a backing store.
    pub fn validated(self) -> Result<Self> {
        VersionRegistry::new(self.known_versions, self.current_versions)
    }

    pub fn known_versions(&self) -> &[String] {
        &self.known_versions
    }

    pub fn current_versions(&self) -> &[String] {
        &self.current_versions
    }

    pub fn is_known(&self, version: &str) -> bool {
        self.known_versions.iter().any(|v| v == version)
    }

    pub fn is_current(&self, version: &str) -> bool {
        self.current_versions.iter().any(|v| v == version)
    }

    /// The greatest known version, if any.
    pub fn latest_version(&self) -> Option<AppVersion> {
        self.known_versions
            .iter()
            .filter_map(|v| v.parse::<AppVersion>().ok())
            .max()
    }

    /// Register a new version. `version` must already be canonical.
    pub fn create_version(&mut self, version: &str, mark_current: bool) -> Result<()> {
        if self.is_known(version) {
            return Err(MetadataError::DuplicateVersion(version.to_string()));
        }
        self.known_versions.push(version.to_string());
        if mark_current {
            self.current_versions.push(version.to_string());
        }
        Ok(())
    }

    /// Replace the current versions wholesale.
    ///
    /// Every member is validated before anything changes; on failure the
    /// registry is left untouched.
    pub fn set_current_versions<I>(&mut self, versions: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut next: Vec<String> = Vec::new();
        let mut rejected: BTreeSet<String> = BTreeSet::new();

        for version in versions {
            let raw = version.as_ref();
            match AppVersion::canonicalize(raw) {
                Ok(v) if self.is_known(&v) => {
                    if !next.contains(&v) {
                        next.push(v);
                    }
                }
                Ok(v) => {
                    rejected.insert(v);
                }
                Err(_) => {
                    rejected.insert(raw.to_string());
                }
            }
        }

        if !rejected.is_empty() {
            let rejected: Vec<String> = rejected.into_iter().collect();
            return Err(MetadataError::InvalidVersion(rejected.join(", ")));
        }
        if next.is_empty() {
            return Err(MetadataError::InvalidVersion(
                "current versions cannot be empty".to_string(),
            ));
        }

        self.current_versions = next;
        Ok(())
    }
}
