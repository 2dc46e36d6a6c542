//! Engine configuration.

use crate::CollectionName;
use std::time::Duration;

/// Default bound on a single remote write attempt.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Collections of the Flock community app.
pub const DEFAULT_COLLECTIONS: [&str; 5] = [
    "events",
    "announcements",
    "prayers",
    "discussions",
    "groups",
];

/// Configuration for [`SyncEngine`](crate::SyncEngine).
///
/// This is an embedded library, so configuration is plain values handed over
/// by the host application; there is no env or CLI surface.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Collection names the engine will accept operations for.
    pub collections: Vec<CollectionName>,
    /// How long a remote write may run before the engine stops waiting.
    pub remote_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_COLLECTIONS)
    }
}

impl EngineConfig {
    /// Build a config for the given collections with the default timeout.
    pub fn new<I, S>(collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CollectionName>,
    {
        Self {
            collections: collections.into_iter().map(Into::into).collect(),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    /// Override the remote write timeout.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Whether a collection name is known to this engine.
    pub fn knows(&self, collection: &str) -> bool {
        self.collections.iter().any(|c| c == collection)
    }
}
