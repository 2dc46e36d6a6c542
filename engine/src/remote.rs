//! Cloud document-store adapter.
//!
//! The host application implements [`RemoteStore`] over its actual backend
//! (Firestore-style document database, REST API, ...). The engine only needs
//! three calls: a live full-snapshot subscription, an add, and a field merge.
//!
//! [`MemoryRemote`] is an in-process stand-in with connectivity and latency
//! knobs, used by the test suite and useful for host-app demos.

use crate::{error::Result, Error, RemoteDoc};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Event delivered on a live subscription.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    /// The full current snapshot of the collection, newest first.
    Snapshot(Vec<RemoteDoc>),
    /// The subscription failed. Delivered at most once; the subscription is
    /// dead afterwards and there is no auto-reconnect.
    Error(String),
}

/// Handle to a live remote subscription.
///
/// Dropping the handle unsubscribes; calling [`unsubscribe`] repeatedly is
/// safe.
///
/// [`unsubscribe`]: RemoteSubscription::unsubscribe
pub struct RemoteSubscription {
    receiver: mpsc::UnboundedReceiver<RemoteEvent>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl RemoteSubscription {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<RemoteEvent>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Wait for the next event. `None` once the remote side closed the stream.
    pub async fn next(&mut self) -> Option<RemoteEvent> {
        self.receiver.recv().await
    }

    /// Stop the subscription. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for RemoteSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Adapter over the cloud document database.
///
/// Implementations report plain network failures as
/// [`Error::RemoteUnavailable`]; the engine owns the timeout bound on top.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Open a live subscription delivering the full ordered snapshot on every
    /// change, starting with the current state.
    async fn subscribe(&self, collection: &str) -> Result<RemoteSubscription>;

    /// Append a new document; the server assigns id and `created_at`.
    async fn add(&self, collection: &str, fields: Map<String, Value>) -> Result<RemoteDoc>;

    /// Merge fields into an existing document.
    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<()>;
}

struct Subscriber {
    id: String,
    sender: mpsc::UnboundedSender<RemoteEvent>,
}

/// In-process fake cloud store.
///
/// Knobs:
/// - [`set_online`](MemoryRemote::set_online) fails every call while offline
/// - [`set_add_latency`](MemoryRemote::set_add_latency) delays adds, which
///   lets tests drive the engine's timeout race
/// - [`fail_subscriptions`](MemoryRemote::fail_subscriptions) kills live
///   subscriptions with an error event
pub struct MemoryRemote {
    collections: DashMap<String, Vec<RemoteDoc>>,
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,
    online: AtomicBool,
    add_latency: Mutex<Option<Duration>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self {
            collections: DashMap::new(),
            subscribers: Arc::new(DashMap::new()),
            online: AtomicBool::new(true),
            add_latency: Mutex::new(None),
        }
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Toggle simulated connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Delay every `add` by the given duration (`None` clears it).
    pub fn set_add_latency(&self, latency: Option<Duration>) {
        *self
            .add_latency
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = latency;
    }

    /// Current documents of a collection, newest first.
    pub fn docs(&self, collection: &str) -> Vec<RemoteDoc> {
        let mut docs = self
            .collections
            .get(collection)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        sort_docs(&mut docs);
        docs
    }

    /// Kill all live subscriptions for a collection with an error event.
    pub fn fail_subscriptions(&self, collection: &str, message: &str) {
        if let Some((_, subs)) = self.subscribers.remove(collection) {
            for sub in subs {
                let _ = sub.sender.send(RemoteEvent::Error(message.to_string()));
            }
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::RemoteUnavailable("network unreachable".into()))
        }
    }

    fn notify(&self, collection: &str) {
        let snapshot = self.docs(collection);
        if let Some(mut subs) = self.subscribers.get_mut(collection) {
            subs.retain(|sub| {
                sub.sender
                    .send(RemoteEvent::Snapshot(snapshot.clone()))
                    .is_ok()
            });
        }
    }
}

fn sort_docs(docs: &mut [RemoteDoc]) {
    // Stable, so equal timestamps keep insertion order
    docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn subscribe(&self, collection: &str) -> Result<RemoteSubscription> {
        self.check_online()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let sub_id = Uuid::new_v4().to_string();

        // Live subscriptions deliver the current state immediately
        let _ = tx.send(RemoteEvent::Snapshot(self.docs(collection)));

        self.subscribers
            .entry(collection.to_string())
            .or_default()
            .push(Subscriber {
                id: sub_id.clone(),
                sender: tx,
            });

        let subscribers = Arc::clone(&self.subscribers);
        let collection = collection.to_string();
        Ok(RemoteSubscription::new(rx, move || {
            if let Some(mut subs) = subscribers.get_mut(&collection) {
                subs.retain(|sub| sub.id != sub_id);
            }
        }))
    }

    async fn add(&self, collection: &str, fields: Map<String, Value>) -> Result<RemoteDoc> {
        self.check_online()?;

        let latency = *self
            .add_latency
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
            // Connectivity may have dropped while the call was in flight
            self.check_online()?;
        }

        let doc = RemoteDoc {
            id: format!("doc-{}", Uuid::new_v4()),
            created_at: Utc::now(),
            fields,
        };

        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        self.notify(collection);

        Ok(doc)
    }

    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        self.check_online()?;

        {
            let mut entry = self
                .collections
                .get_mut(collection)
                .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
            let doc = entry
                .iter_mut()
                .find(|doc| doc.id == id)
                .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
            for (key, value) in fields {
                doc.fields.insert(key, value);
            }
        }

        self.notify(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn add_assigns_server_id_and_clock() {
        let remote = MemoryRemote::new();

        let doc = remote
            .add("events", fields(json!({"title": "Bake Sale"})))
            .await
            .unwrap();

        assert!(doc.id.starts_with("doc-"));
        assert_eq!(doc.fields["title"], "Bake Sale");
        assert_eq!(remote.docs("events").len(), 1);
    }

    #[tokio::test]
    async fn offline_add_fails() {
        let remote = MemoryRemote::new();
        remote.set_online(false);

        let err = remote
            .add("events", fields(json!({"title": "Bake Sale"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable(_)));
    }

    #[tokio::test]
    async fn subscription_gets_initial_and_live_snapshots() {
        let remote = MemoryRemote::new();
        remote
            .add("events", fields(json!({"title": "First"})))
            .await
            .unwrap();

        let mut sub = remote.subscribe("events").await.unwrap();
        match sub.next().await.unwrap() {
            RemoteEvent::Snapshot(docs) => assert_eq!(docs.len(), 1),
            RemoteEvent::Error(e) => panic!("unexpected error: {e}"),
        }

        remote
            .add("events", fields(json!({"title": "Second"})))
            .await
            .unwrap();
        match sub.next().await.unwrap() {
            RemoteEvent::Snapshot(docs) => assert_eq!(docs.len(), 2),
            RemoteEvent::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn update_merges_fields_and_notifies() {
        let remote = MemoryRemote::new();
        let doc = remote
            .add("events", fields(json!({"title": "Bake Sale", "spots": 5})))
            .await
            .unwrap();

        let mut sub = remote.subscribe("events").await.unwrap();
        let _initial = sub.next().await.unwrap();

        remote
            .update("events", &doc.id, fields(json!({"spots": 12})))
            .await
            .unwrap();

        match sub.next().await.unwrap() {
            RemoteEvent::Snapshot(docs) => {
                assert_eq!(docs[0].fields["spots"], 12);
                assert_eq!(docs[0].fields["title"], "Bake Sale");
            }
            RemoteEvent::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn update_unknown_record_fails() {
        let remote = MemoryRemote::new();
        remote
            .add("events", fields(json!({"title": "Bake Sale"})))
            .await
            .unwrap();

        let err = remote
            .update("events", "doc-missing", fields(json!({"spots": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn failed_subscription_delivers_single_error() {
        let remote = MemoryRemote::new();
        let mut sub = remote.subscribe("events").await.unwrap();
        let _initial = sub.next().await.unwrap();

        remote.fail_subscriptions("events", "stream closed");

        match sub.next().await.unwrap() {
            RemoteEvent::Error(msg) => assert_eq!(msg, "stream closed"),
            RemoteEvent::Snapshot(_) => panic!("expected error event"),
        }
        // Subscription is dead: channel closes, no further events
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let remote = MemoryRemote::new();
        let mut sub = remote.subscribe("events").await.unwrap();
        let _initial = sub.next().await.unwrap();

        sub.unsubscribe();
        sub.unsubscribe();

        remote
            .add("events", fields(json!({"title": "After"})))
            .await
            .unwrap();
        assert!(sub.next().await.is_none());
    }
}
