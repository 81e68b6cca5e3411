use std::sync::Arc;

use metaver_lib::{MetadataCoordinator, StalenessTracker};

/// Shared application state for the HTTP server.
pub struct AppState {
    /// Published metadata snapshots.
    pub coordinator: Arc<MetadataCoordinator>,
    /// Staleness tracking against the shared timestamp store.
    pub tracker: Arc<StalenessTracker>,
}
