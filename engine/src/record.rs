//! Record types shared by the local and remote stores.

use crate::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Prefix of locally generated provisional identifiers.
///
/// A record keeps a provisional id until the remote store accepts it and
/// assigns the authoritative document id.
pub const PROVISIONAL_PREFIX: &str = "local-";

/// Generate a fresh provisional record id.
pub fn provisional_id() -> RecordId {
    format!("{}{}", PROVISIONAL_PREFIX, Uuid::new_v4())
}

/// Sync lifecycle of a record.
///
/// The persisted flag is only `pending_sync`; `SyncInFlight` is derived from
/// the engine's in-flight tracking and never written to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    /// Durable locally, no remote attempt currently running.
    LocalOnly,
    /// A remote write for this record is racing the timeout right now.
    SyncInFlight,
    /// Confirmed by the remote store; the id is a real document id.
    Synced,
}

/// A domain item (event, prayer, announcement, ...) with sync bookkeeping.
///
/// Domain fields are kept as a flattened JSON object so the same shape serves
/// every collection. `pending_sync` is purely local bookkeeping and is never
/// written to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Server-assigned document id, or a provisional `local-` id.
    pub id: RecordId,
    /// True until the remote store has accepted this record's latest state.
    pub pending_sync: bool,
    /// Server clock once synced; device clock while local-only.
    pub created_at: DateTime<Utc>,
    /// Domain fields, flattened into the record object.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record for a local-first write: provisional id, device clock,
    /// pending until the remote store confirms it.
    pub fn new_local(fields: Map<String, Value>) -> Self {
        Self {
            id: provisional_id(),
            pending_sync: true,
            created_at: Utc::now(),
            fields,
        }
    }

    /// Build a synced record from a remote document.
    pub fn from_remote(doc: RemoteDoc) -> Self {
        Self {
            id: doc.id,
            pending_sync: false,
            created_at: doc.created_at,
            fields: doc.fields,
        }
    }

    /// Whether this record still carries a locally generated id.
    pub fn is_provisional(&self) -> bool {
        self.id.starts_with(PROVISIONAL_PREFIX)
    }

    /// Apply a remote confirmation: swap in the server id and server clock,
    /// clear the pending flag. Domain fields are kept as-is so an edit made
    /// while the write was in flight is not clobbered.
    pub fn confirm(&mut self, id: RecordId, created_at: DateTime<Utc>) {
        self.id = id;
        self.created_at = created_at;
        self.pending_sync = false;
    }

    /// Merge partial domain fields into this record, overwriting existing keys.
    pub fn merge_fields(&mut self, partial: &Map<String, Value>) {
        for (key, value) in partial {
            self.fields.insert(key.clone(), value.clone());
        }
    }
}

/// A document as the remote store knows it.
///
/// Same fields as [`Record`] minus `pending_sync`, plus the server-managed
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDoc {
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}
