//! Versioned metadata distribution.
//!
//! Application servers read keyed JSON payloads ("metadata items") from an
//! immutable [`Snapshot`] published by a [`MetadataCoordinator`]. Operators
//! edit them through [`MetadataAdmin`], which swaps in a new snapshot
//! atomically and marks a shared timestamp so that every other process's
//! [`StalenessWatcher`] reloads within one poll interval.

pub mod admin;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod item;
pub mod manifest;
pub mod registry;
pub mod scope;
pub mod space;
pub mod staleness;
pub mod timestamp;
pub mod version;

pub use admin::MetadataAdmin;
pub use coordinator::{CoordinatorBuilder, MetadataCoordinator, Snapshot, WriteGuard};
pub use error::{MetadataError, Result};
#[cfg(feature = "remote")]
pub use fetcher::HttpFetcher;
pub use fetcher::{validate_key, FilesystemFetcher, MemoryFetcher, MetadataFetcher};
pub use item::{ItemTypeRegistry, MetadataItem};
pub use manifest::{content_hash, Manifest, ManifestItem};
pub use registry::VersionRegistry;
pub use scope::{Environment, MetadataScope};
pub use space::MetadataSpace;
pub use staleness::{StalenessTracker, StalenessWatcher, DEFAULT_TIMESTAMP_TTL};
pub use timestamp::{FileTimestampStore, MemoryTimestampStore, TimestampStore};
pub use version::AppVersion;
