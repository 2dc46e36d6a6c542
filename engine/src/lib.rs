//! # Flock Engine
//!
//! The local-first data layer of the Flock community app (events, groups,
//! prayer requests, announcements, discussions).
//!
//! UI screens call three operations - `create`, `update`, `subscribe` - and
//! never touch the stores directly. The engine writes every change to the
//! on-device store first, then syncs with the cloud document store on a
//! best-effort basis:
//!
//! - **No lost input**: a record created offline is durable locally before
//!   any network attempt, flagged `pending_sync` with a provisional id
//! - **Bounded waits**: remote writes race a timeout (default 5 s); the UI
//!   never blocks on a dead network
//! - **Eventual sync**: pending records are pushed again on app focus or on
//!   a connectivity transition, and a write that succeeds after its timeout
//!   is still reconciled without duplicating the record
//! - **Graceful degradation**: remote failures never reach the UI; only a
//!   failed local write surfaces as an error
//!
//! ## Quick Start
//!
//! ```rust
//! use flock_engine::{
//!     EngineConfig, LocalStore, MemoryBackend, MemoryRemote, SharedMonitor, SyncEngine,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> flock_engine::Result<()> {
//! let engine = SyncEngine::new(
//!     Arc::new(LocalStore::new(MemoryBackend::new_shared())),
//!     MemoryRemote::new_shared(),
//!     Arc::new(SharedMonitor::new(true)),
//!     EngineConfig::default(),
//! );
//!
//! let record = engine
//!     .create("events", json!({"title": "Bake Sale"}).as_object().unwrap().clone())
//!     .await?;
//! assert!(!record.pending_sync);
//!
//! let mut subscription = engine.subscribe("events").await?;
//! let snapshot = subscription.next().await.unwrap();
//! assert_eq!(snapshot.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Plugging in a real backend
//!
//! The host application implements [`StorageBackend`] over its platform
//! storage, [`RemoteStore`] over its cloud database, and [`NetworkMonitor`]
//! over its reachability API. [`FileBackend`], [`MemoryRemote`] and
//! [`SharedMonitor`] are ready-made implementations for simple hosts and
//! tests.

pub mod config;
pub mod engine;
pub mod error;
pub mod local;
pub mod merge;
pub mod monitor;
pub mod record;
pub mod remote;

// Re-export main types at crate root
pub use config::{EngineConfig, DEFAULT_COLLECTIONS, DEFAULT_REMOTE_TIMEOUT};
pub use engine::{RetrySummary, Subscription, SyncEngine};
pub use error::{Error, Result};
pub use local::{
    BackendError, FileBackend, LocalStore, MemoryBackend, StorageBackend, STORE_FORMAT_VERSION,
};
pub use monitor::{NetworkMonitor, ProbeMonitor, SharedMonitor};
pub use record::{provisional_id, Record, RemoteDoc, SyncState, PROVISIONAL_PREFIX};
pub use remote::{MemoryRemote, RemoteEvent, RemoteStore, RemoteSubscription};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
