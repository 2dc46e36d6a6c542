//! Snapshot merging and ordering.
//!
//! This is the deterministic heart of reconciliation, kept free of IO so it
//! is trivially testable.
//!
//! # Algorithm
//!
//! 1. The remote snapshot is authoritative: every synced local entry is
//!    replaced by it wholesale (a synced entry absent remotely was deleted
//!    remotely and disappears).
//! 2. Still-pending local entries survive, keyed by id, unless the remote
//!    snapshot already carries that id (then the remote copy wins).
//! 3. The merged list is ordered by `created_at` descending with a stable
//!    sort, so equal timestamps keep their insertion order.
//!
//! Matching is by id only; content-based matching is never attempted.

use crate::{Record, RemoteDoc};
use std::collections::HashSet;

/// Order records newest first. Stable: ties keep insertion order.
pub fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Merge a remote full snapshot with the current local collection.
///
/// Returns the new authoritative local collection, ordered newest first.
pub fn merge_snapshot(remote: Vec<RemoteDoc>, local: Vec<Record>) -> Vec<Record> {
    let remote_ids: HashSet<&str> = remote.iter().map(|doc| doc.id.as_str()).collect();

    let mut pending: Vec<Record> = local
        .into_iter()
        .filter(|record| record.pending_sync && !remote_ids.contains(record.id.as_str()))
        .collect();

    let mut merged: Vec<Record> = remote.into_iter().map(Record::from_remote).collect();
    merged.append(&mut pending);
    sort_newest_first(&mut merged);
    merged
}
