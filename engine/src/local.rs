//! On-device durable persistence.
//!
//! The local store keeps one JSON blob per collection behind a pluggable
//! [`StorageBackend`]. There is no partial-update primitive: callers read the
//! whole collection, transform it, and write the whole collection back. That
//! trade keeps a single key per collection and rules out multi-key corruption,
//! at O(collection size) per write, which is fine at on-device sizes (tens to
//! low hundreds of records).

use crate::{error::Result, CollectionName, Error, Record};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Version of the persisted collection format.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Error from a storage backend. Always mapped to
/// [`Error::StorageUnavailable`] at the [`LocalStore`] boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// Key-value persistence the host platform provides (app storage directory,
/// mobile key-value store, ...). Values are opaque strings.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, BackendError>;
    async fn set(&self, key: &str, value: String) -> std::result::Result<(), BackendError>;
    async fn remove(&self, key: &str) -> std::result::Result<(), BackendError>;
}

/// Envelope written to the backend, versioned for safe migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCollection {
    format_version: u32,
    records: Vec<Record>,
}

/// Durable whole-collection persistence over a [`StorageBackend`].
pub struct LocalStore {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
}

impl LocalStore {
    /// Create a store under the default `flock` namespace.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_namespace(backend, "flock")
    }

    /// Create a store with an explicit key namespace.
    pub fn with_namespace(backend: Arc<dyn StorageBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    fn key(&self, collection: &str) -> String {
        format!("{}/{}", self.namespace, collection)
    }

    /// Read the full collection. A missing key is an empty collection.
    ///
    /// Fails with [`Error::StorageUnavailable`] when the backend itself
    /// fails; callers that can degrade should treat that as "no local data".
    pub async fn read_collection(&self, name: &str) -> Result<Vec<Record>> {
        let raw = self
            .backend
            .get(&self.key(name))
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        let Some(raw) = raw else {
            return Ok(Vec::new());
        };

        let stored: StoredCollection =
            serde_json::from_str(&raw).map_err(|e| Error::CorruptStore {
                collection: CollectionName::from(name),
                reason: e.to_string(),
            })?;

        if stored.format_version != STORE_FORMAT_VERSION {
            return Err(Error::FormatVersionMismatch {
                expected: STORE_FORMAT_VERSION,
                actual: stored.format_version,
            });
        }

        Ok(stored.records)
    }

    /// Serialize and overwrite the full collection. Last write wins; there is
    /// no rollback on partial failure.
    pub async fn write_collection(&self, name: &str, records: &[Record]) -> Result<()> {
        let stored = StoredCollection {
            format_version: STORE_FORMAT_VERSION,
            records: records.to_vec(),
        };
        let raw = serde_json::to_string(&stored)
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        self.backend
            .set(&self.key(name), raw)
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))
    }

    /// Drop the stored blob for a collection.
    pub async fn clear_collection(&self, name: &str) -> Result<()> {
        self.backend
            .remove(&self.key(name))
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))
    }
}

/// In-memory backend for tests and ephemeral embedding.
///
/// Failure knobs let tests exercise the `StorageUnavailable` paths.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make subsequent reads fail with a backend error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, BackendError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError("simulated read failure".into()));
        }
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> std::result::Result<(), BackendError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError("simulated write failure".into()));
        }
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> std::result::Result<(), BackendError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError("simulated write failure".into()));
        }
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// File-per-key backend over a directory, using write-then-rename so a
/// crashed write never leaves a truncated blob behind.
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys contain the namespace separator; flatten to one file name.
        self.root.join(format!("{}.json", key.replace('/', "__")))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, BackendError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError(e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: String) -> std::result::Result<(), BackendError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| BackendError(e.to_string()))?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| BackendError(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| BackendError(e.to_string()))
    }

    async fn remove(&self, key: &str) -> std::result::Result<(), BackendError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(title: &str) -> Record {
        let fields = match json!({"title": title}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        Record::new_local(fields)
    }

    #[tokio::test]
    async fn missing_collection_reads_empty() {
        let store = LocalStore::new(MemoryBackend::new_shared());
        assert_eq!(store.read_collection("events").await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn write_read_roundtrip() {
        let store = LocalStore::new(MemoryBackend::new_shared());
        let records = vec![record("Bake Sale"), record("Potluck")];

        store.write_collection("events", &records).await.unwrap();
        let loaded = store.read_collection("events").await.unwrap();

        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn write_overwrites_previous_value() {
        let store = LocalStore::new(MemoryBackend::new_shared());

        store
            .write_collection("events", &[record("First")])
            .await
            .unwrap();
        let replacement = vec![record("Second")];
        store.write_collection("events", &replacement).await.unwrap();

        assert_eq!(store.read_collection("events").await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn backend_read_failure_is_storage_unavailable() {
        let backend = MemoryBackend::new_shared();
        let store = LocalStore::new(backend.clone());

        backend.set_fail_reads(true);
        let err = store.read_collection("events").await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn backend_write_failure_is_storage_unavailable() {
        let backend = MemoryBackend::new_shared();
        let store = LocalStore::new(backend.clone());

        backend.set_fail_writes(true);
        let err = store
            .write_collection("events", &[record("Bake Sale")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn corrupt_blob_is_reported() {
        let backend = MemoryBackend::new_shared();
        let store = LocalStore::new(backend.clone());

        backend
            .set("flock/events", "not json".into())
            .await
            .unwrap();

        let err = store.read_collection("events").await.unwrap_err();
        assert!(matches!(err, Error::CorruptStore { .. }));
    }

    #[tokio::test]
    async fn future_format_version_is_rejected() {
        let backend = MemoryBackend::new_shared();
        let store = LocalStore::new(backend.clone());

        backend
            .set(
                "flock/events",
                r#"{"formatVersion":99,"records":[]}"#.into(),
            )
            .await
            .unwrap();

        let err = store.read_collection("events").await.unwrap_err();
        assert_eq!(
            err,
            Error::FormatVersionMismatch {
                expected: STORE_FORMAT_VERSION,
                actual: 99
            }
        );
    }

    #[tokio::test]
    async fn clear_collection_removes_blob() {
        let store = LocalStore::new(MemoryBackend::new_shared());

        store
            .write_collection("events", &[record("Bake Sale")])
            .await
            .unwrap();
        store.clear_collection("events").await.unwrap();

        assert_eq!(store.read_collection("events").await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let backend = MemoryBackend::new_shared();
        let store_a = LocalStore::with_namespace(backend.clone(), "a");
        let store_b = LocalStore::with_namespace(backend, "b");

        store_a
            .write_collection("events", &[record("Only in A")])
            .await
            .unwrap();

        assert_eq!(store_b.read_collection("events").await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(Arc::new(FileBackend::new(dir.path())));
        let records = vec![record("Bake Sale")];

        store.write_collection("events", &records).await.unwrap();
        assert_eq!(store.read_collection("events").await.unwrap(), records);

        store.clear_collection("events").await.unwrap();
        assert_eq!(store.read_collection("events").await.unwrap(), vec![]);
    }
}
