use thiserror::Error;

use crate::scope::MetadataScope;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MetadataError>;

/// Every failure the metadata core can report.
///
/// Read-path callers normally only see [`MetadataError::InvalidVersion`] or
/// [`MetadataError::MetadataUnavailable`]; the admin path surfaces the
/// underlying cause verbatim.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("duplicate version: {0} already exists")]
    DuplicateVersion(String),

    #[error("missing manifest item: {key} in version {version}")]
    MissingManifestItem { key: String, version: String },

    #[error("invalid metadata key: {0:?}")]
    InvalidKey(String),

    #[error("no metadata item type registered for key {0:?}")]
    UnregisteredItem(String),

    #[error("metadata item {key} belongs to {expected} metadata, not {actual}")]
    WrongItemScope {
        key: String,
        expected: MetadataScope,
        actual: MetadataScope,
    },

    #[error("content of metadata item {key} does not match its type: {source}")]
    InvalidItemContent {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("metadata unavailable: {key} in version {version}")]
    MetadataUnavailable { key: String, version: String },

    #[error("fetcher I/O error at {location}: {message}")]
    FetcherIo { location: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stale view of {0} metadata, refresh and try again")]
    StaleWriteRefused(MetadataScope),

    #[error("shared timestamp store error: {0}")]
    TimestampStore(String),

    #[error("failed to initialize {scope} metadata: {source}")]
    InitializationFailure {
        scope: MetadataScope,
        #[source]
        source: Box<MetadataError>,
    },

    #[error("{context}: {source}")]
    Admin {
        context: String,
        #[source]
        source: Box<MetadataError>,
    },
}

impl MetadataError {
    pub(crate) fn fetcher(location: impl Into<String>, message: impl ToString) -> Self {
        MetadataError::FetcherIo {
            location: location.into(),
            message: message.to_string(),
        }
    }

    /// Attach operator-facing context (scope, version, key) to an admin failure.
    pub(crate) fn in_admin(self, context: impl Into<String>) -> Self {
        MetadataError::Admin {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip [`MetadataError::Admin`] wrappers and return the root cause.
    pub fn root(&self) -> &MetadataError {
        match self {
            MetadataError::Admin { source, .. } => source.root(),
            MetadataError::InitializationFailure { source, .. } => source.root(),
            other => other,
        }
    }
}
