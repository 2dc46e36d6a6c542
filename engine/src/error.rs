//! Error types for the Flock engine.

use crate::{CollectionName, RecordId};
use thiserror::Error;

/// All possible errors from the Flock engine.
///
/// Only [`Error::StorageUnavailable`] ever crosses the engine boundary as a
/// hard failure: it means no durable write happened anywhere, so the caller
/// must tell the user their input was not saved. Remote failures are absorbed
/// into pending-sync bookkeeping and subscription failures degrade to a local
/// fallback read.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The on-device store failed a read or write.
    #[error("local storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A remote call failed or exceeded the configured timeout.
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// A live subscription reported an error and is now dead.
    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// The persisted blob for a collection could not be decoded.
    #[error("corrupt stored collection '{collection}': {reason}")]
    CorruptStore {
        collection: CollectionName,
        reason: String,
    },

    #[error("unsupported store format version: expected {expected}, got {actual}")]
    FormatVersionMismatch { expected: u32, actual: u32 },
}

impl Error {
    /// Whether this error leaves a record eligible for a later retry pass.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::RemoteUnavailable(_) | Error::Subscription(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
