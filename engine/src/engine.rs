//! SyncEngine - the reconciliation core.
//!
//! The engine owns the policy glue between the local and remote stores:
//!
//! - writes go to the local store first, so input entered offline is durable
//!   before any network attempt
//! - remote writes race a timeout; a failed or timed-out attempt is absorbed
//!   and the record stays flagged `pending_sync` for a later retry pass
//! - a late success after the race already elapsed is still applied, keyed by
//!   provisional id, so a retry does not duplicate the record remotely
//! - reads prefer a live remote subscription mirrored into the local store,
//!   and fall back to a one-shot local read while offline
//!
//! Only [`Error::StorageUnavailable`] crosses this boundary as a failure.
//! All local read-modify-write cycles are serialized per collection.

use crate::{
    error::Result, merge, CollectionName, EngineConfig, Error, LocalStore, NetworkMonitor, Record,
    RecordId, RemoteDoc, RemoteEvent, RemoteStore, SyncState,
};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Handle to a collection subscription.
///
/// Delivers the full ordered snapshot on every change. [`unsubscribe`] is
/// idempotent and dropping the handle unsubscribes. Long-lived screens should
/// re-subscribe on focus to pick up connectivity changes; a subscription
/// opened offline delivers exactly one local snapshot.
///
/// [`unsubscribe`]: Subscription::unsubscribe
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Vec<Record>>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wait for the next snapshot. `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Vec<Record>> {
        self.receiver.recv().await
    }

    /// Stop receiving snapshots. Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Outcome of a [`SyncEngine::retry_pending`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySummary {
    /// Records confirmed by the remote store during this pass.
    pub synced: usize,
    /// Records that stayed pending (remote still unreachable, or skipped
    /// because a write for them was already in flight).
    pub still_pending: usize,
}

/// Reconciliation between the on-device store and the cloud store.
///
/// Stores and monitor are injected at construction; the engine is the sole
/// writer to the local store and UI collaborators never bypass it.
#[derive(Clone)]
pub struct SyncEngine {
    local: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    monitor: Arc<dyn NetworkMonitor>,
    config: EngineConfig,
    /// Per-collection write serialization for local read-modify-write cycles.
    locks: Arc<DashMap<CollectionName, Arc<Mutex<()>>>>,
    /// Provisional ids with a remote add currently racing the timeout.
    in_flight: Arc<DashMap<RecordId, ()>>,
}

impl SyncEngine {
    pub fn new(
        local: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        monitor: Arc<dyn NetworkMonitor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            local,
            remote,
            monitor,
            config,
            locks: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Create a record: durable local write first, then a best-effort remote
    /// add bounded by the configured timeout.
    ///
    /// Never fails on remote trouble; the returned record then carries
    /// `pending_sync: true` and a provisional id. Fails only with
    /// [`Error::StorageUnavailable`] when the local write itself failed, in
    /// which case nothing durable happened anywhere.
    pub async fn create(&self, collection: &str, fields: Map<String, Value>) -> Result<Record> {
        self.ensure_known(collection)?;
        let record = Record::new_local(fields);

        {
            let lock = self.collection_lock(collection);
            let _guard = lock.lock().await;
            let mut records = self.read_or_empty(collection).await;
            records.push(record.clone());
            self.local.write_collection(collection, &records).await?;
        }

        if !self.monitor.is_connected().await {
            tracing::debug!(collection, id = %record.id, "offline, remote write deferred");
            return Ok(record);
        }

        match self.add_with_deadline(collection, &record).await {
            Some(doc) => {
                let confirmed = self.apply_confirmation(collection, &record.id, doc).await;
                Ok(confirmed.unwrap_or(record))
            }
            None => Ok(record),
        }
    }

    /// Merge partial fields into a record: durable local write first, then a
    /// best-effort remote update when the record already has a confirmed id.
    ///
    /// A provisional record skips the remote call entirely; the pending add
    /// retry will carry the latest fields.
    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<()> {
        self.ensure_known(collection)?;

        let provisional = {
            let lock = self.collection_lock(collection);
            let _guard = lock.lock().await;
            let mut records = self.read_or_empty(collection).await;
            let Some(record) = records.iter_mut().find(|r| r.id == id) else {
                return Err(Error::RecordNotFound(id.to_string()));
            };
            record.merge_fields(&partial);
            record.pending_sync = true;
            let provisional = record.is_provisional();
            self.local.write_collection(collection, &records).await?;
            provisional
        };

        if provisional || !self.monitor.is_connected().await {
            return Ok(());
        }

        if self.update_with_deadline(collection, id, partial).await {
            self.clear_pending(collection, id).await;
        }
        Ok(())
    }

    /// Subscribe to a collection.
    ///
    /// When connected, opens a live remote subscription; every remote
    /// snapshot is mirrored into the local store (replacing synced entries,
    /// preserving still-pending local-only entries) and forwarded merged and
    /// ordered. When disconnected, delivers exactly one snapshot from the
    /// local store. A remote subscription error is logged, answered with one
    /// last local snapshot, and ends the stream; callers re-subscribe.
    pub async fn subscribe(&self, collection: &str) -> Result<Subscription> {
        self.ensure_known(collection)?;
        let (tx, rx) = mpsc::unbounded_channel();

        if !self.monitor.is_connected().await {
            let _ = tx.send(self.local_snapshot(collection).await);
            return Ok(Subscription {
                receiver: rx,
                forwarder: None,
            });
        }

        let mut remote_sub = match self.remote.subscribe(collection).await {
            Ok(sub) => sub,
            Err(err) => {
                // Connectivity flapped between the check and the call
                tracing::debug!(collection, error = %err, "remote subscribe failed, serving local snapshot");
                let _ = tx.send(self.local_snapshot(collection).await);
                return Ok(Subscription {
                    receiver: rx,
                    forwarder: None,
                });
            }
        };

        let engine = self.clone();
        let name = collection.to_string();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = remote_sub.next().await {
                match event {
                    RemoteEvent::Snapshot(docs) => {
                        let merged = engine.mirror_snapshot(&name, docs).await;
                        if tx.send(merged).is_err() {
                            break; // subscriber gone
                        }
                    }
                    RemoteEvent::Error(message) => {
                        tracing::warn!(
                            collection = %name,
                            error = %message,
                            "remote subscription failed, falling back to local snapshot"
                        );
                        let _ = tx.send(engine.local_snapshot(&name).await);
                        break;
                    }
                }
            }
        });

        Ok(Subscription {
            receiver: rx,
            forwarder: Some(forwarder),
        })
    }

    /// One-shot ordered read from the local store.
    pub async fn snapshot(&self, collection: &str) -> Result<Vec<Record>> {
        self.ensure_known(collection)?;
        let mut records = self.local.read_collection(collection).await?;
        merge::sort_newest_first(&mut records);
        Ok(records)
    }

    /// Push every pending record to the remote store. Intended for app
    /// foreground/focus; a no-op while disconnected.
    ///
    /// Provisional records are re-added (confirmation swaps in the server
    /// id), records with a confirmed id are re-sent as field updates.
    pub async fn retry_pending(&self) -> RetrySummary {
        let mut summary = RetrySummary::default();
        if !self.monitor.is_connected().await {
            return summary;
        }

        for collection in self.config.collections.clone() {
            let pending: Vec<Record> = {
                let lock = self.collection_lock(&collection);
                let _guard = lock.lock().await;
                self.read_or_empty(&collection)
                    .await
                    .into_iter()
                    .filter(|r| r.pending_sync && !self.in_flight.contains_key(&r.id))
                    .collect()
            };

            for record in pending {
                let synced = if record.is_provisional() {
                    match self.add_with_deadline(&collection, &record).await {
                        Some(doc) => self
                            .apply_confirmation(&collection, &record.id, doc)
                            .await
                            .is_some(),
                        None => false,
                    }
                } else {
                    let sent = self
                        .update_with_deadline(&collection, &record.id, record.fields.clone())
                        .await;
                    if sent {
                        self.clear_pending(&collection, &record.id).await;
                    }
                    sent
                };

                if synced {
                    summary.synced += 1;
                } else {
                    summary.still_pending += 1;
                }
            }
        }

        summary
    }

    /// Run [`retry_pending`](Self::retry_pending) whenever the monitor
    /// reports a transition to connected. `None` when the monitor has no
    /// change stream.
    pub fn spawn_retry_on_reconnect(&self) -> Option<JoinHandle<()>> {
        let mut changes = self.monitor.changes()?;
        let engine = self.clone();
        Some(tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                if *changes.borrow_and_update() {
                    let summary = engine.retry_pending().await;
                    tracing::debug!(
                        synced = summary.synced,
                        still_pending = summary.still_pending,
                        "reconnect retry pass finished"
                    );
                }
            }
        }))
    }

    /// Sync lifecycle state of a record as this engine sees it.
    pub fn sync_state(&self, record: &Record) -> SyncState {
        if !record.pending_sync {
            SyncState::Synced
        } else if self.in_flight.contains_key(&record.id) {
            SyncState::SyncInFlight
        } else {
            SyncState::LocalOnly
        }
    }

    fn ensure_known(&self, collection: &str) -> Result<()> {
        if self.config.knows(collection) {
            Ok(())
        } else {
            Err(Error::CollectionNotFound(collection.to_string()))
        }
    }

    fn collection_lock(&self, collection: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(collection.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Local read for paths that must degrade instead of failing: a broken
    /// local read means "no local data".
    async fn read_or_empty(&self, collection: &str) -> Vec<Record> {
        match self.local.read_collection(collection).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(collection, error = %err, "local read failed, treating as empty");
                Vec::new()
            }
        }
    }

    async fn local_snapshot(&self, collection: &str) -> Vec<Record> {
        let mut records = self.read_or_empty(collection).await;
        merge::sort_newest_first(&mut records);
        records
    }

    /// Race a remote add against the timeout. Returns the server document on
    /// an in-deadline success. The underlying call is never cancelled: on
    /// timeout, a detached task keeps waiting and applies a late success
    /// idempotently so a subsequent retry does not duplicate the record.
    async fn add_with_deadline(&self, collection: &str, record: &Record) -> Option<RemoteDoc> {
        self.in_flight.insert(record.id.clone(), ());

        let (tx, mut rx) = oneshot::channel();
        {
            let remote = Arc::clone(&self.remote);
            let collection = collection.to_string();
            let fields = record.fields.clone();
            tokio::spawn(async move {
                let _ = tx.send(remote.add(&collection, fields).await);
            });
        }

        match tokio::time::timeout(self.config.remote_timeout, &mut rx).await {
            Ok(Ok(Ok(doc))) => Some(doc),
            Ok(Ok(Err(err))) => {
                tracing::debug!(collection, id = %record.id, error = %err, "remote add failed, record stays pending");
                self.in_flight.remove(&record.id);
                None
            }
            Ok(Err(_)) => {
                // Writer task dropped without an answer
                self.in_flight.remove(&record.id);
                None
            }
            Err(_) => {
                tracing::debug!(collection, id = %record.id, "remote add timed out, record stays pending");
                let engine = self.clone();
                let collection = collection.to_string();
                let provisional_id = record.id.clone();
                tokio::spawn(async move {
                    match rx.await {
                        Ok(Ok(doc)) => {
                            tracing::debug!(
                                collection = %collection,
                                id = %provisional_id,
                                "late remote add success, reconciling"
                            );
                            let _ = engine
                                .apply_confirmation(&collection, &provisional_id, doc)
                                .await;
                        }
                        _ => {
                            engine.in_flight.remove(&provisional_id);
                        }
                    }
                });
                None
            }
        }
    }

    /// Race a remote field update against the timeout. A late success clears
    /// the pending flag in the background.
    async fn update_with_deadline(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> bool {
        let (tx, mut rx) = oneshot::channel();
        {
            let remote = Arc::clone(&self.remote);
            let collection = collection.to_string();
            let id = id.to_string();
            tokio::spawn(async move {
                let _ = tx.send(remote.update(&collection, &id, fields).await);
            });
        }

        match tokio::time::timeout(self.config.remote_timeout, &mut rx).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(err))) => {
                tracing::debug!(collection, id, error = %err, "remote update failed, record stays pending");
                false
            }
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::debug!(collection, id, "remote update timed out, record stays pending");
                let engine = self.clone();
                let collection = collection.to_string();
                let id = id.to_string();
                tokio::spawn(async move {
                    if let Ok(Ok(())) = rx.await {
                        engine.clear_pending(&collection, &id).await;
                    }
                });
                false
            }
        }
    }

    /// Persist a remote confirmation: swap the provisional id for the server
    /// id and clear the pending flag. Idempotent by provisional id - if a
    /// subscription snapshot already mirrored the server copy, the provisional
    /// entry is dropped instead of renamed, so no duplicate appears.
    async fn apply_confirmation(
        &self,
        collection: &str,
        provisional_id: &str,
        doc: RemoteDoc,
    ) -> Option<Record> {
        let result = self
            .try_apply_confirmation(collection, provisional_id, doc)
            .await;
        self.in_flight.remove(provisional_id);
        match result {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(collection, id = %provisional_id, error = %err, "could not persist remote confirmation");
                None
            }
        }
    }

    async fn try_apply_confirmation(
        &self,
        collection: &str,
        provisional_id: &str,
        doc: RemoteDoc,
    ) -> Result<Option<Record>> {
        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;
        let mut records = self.read_or_empty(collection).await;

        if records.iter().any(|r| r.id == doc.id) {
            let before = records.len();
            records.retain(|r| r.id != provisional_id);
            if records.len() != before {
                self.local.write_collection(collection, &records).await?;
            }
            return Ok(records.iter().find(|r| r.id == doc.id).cloned());
        }

        let Some(record) = records.iter_mut().find(|r| r.id == provisional_id) else {
            return Ok(None); // removed meanwhile, nothing to reconcile
        };
        record.confirm(doc.id, doc.created_at);
        let confirmed = record.clone();
        self.local.write_collection(collection, &records).await?;
        Ok(Some(confirmed))
    }

    async fn clear_pending(&self, collection: &str, id: &str) {
        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;
        let mut records = self.read_or_empty(collection).await;
        let Some(record) = records.iter_mut().find(|r| r.id == id && r.pending_sync) else {
            return;
        };
        record.pending_sync = false;
        if let Err(err) = self.local.write_collection(collection, &records).await {
            tracing::warn!(collection, id, error = %err, "could not clear pending flag");
        }
    }

    /// Mirror a remote snapshot into the local store and return the merged,
    /// ordered collection. A failed mirror write only makes the cache stale;
    /// the fresh snapshot is still forwarded.
    async fn mirror_snapshot(&self, collection: &str, docs: Vec<RemoteDoc>) -> Vec<Record> {
        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;
        let local = self.read_or_empty(collection).await;
        let merged = merge::merge_snapshot(docs, local);
        if let Err(err) = self.local.write_collection(collection, &merged).await {
            tracing::warn!(collection, error = %err, "could not mirror remote snapshot");
        }
        merged
    }
}
