//! In-process remote store.
//!
//! Holds the whole dataset as one JSON tree. Writes are normalised the way
//! the backend stores data: null fields and empty objects are dropped and
//! empty parents pruned, so an absent node always reads as `None`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::push_id::PushIdGenerator;
use super::{
    child_path, split_path, Query, RemoteStore, Snapshot, SnapshotEvent, Subscription,
    SubscriptionId,
};
use crate::clock::{Clock, SystemClock};
use crate::error::RemoteError;

struct Listener {
    id: SubscriptionId,
    path: String,
    segments: Vec<String>,
    query: Query,
    /// Last view delivered, to skip notifications for unrelated writes.
    last: Option<Value>,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
}

struct TreeState {
    root: Value,
    listeners: Vec<Listener>,
    next_id: SubscriptionId,
}

pub struct MemoryRemoteStore {
    state: Mutex<TreeState>,
    offline: AtomicBool,
    push_ids: PushIdGenerator,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemoteStore")
            .field("offline", &self.offline.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::from_tree(Value::Object(Map::new()))
    }

    /// Restores a store from a previously exported tree.
    pub fn from_tree(tree: Value) -> Self {
        let root = normalize(tree).unwrap_or_else(|| Value::Object(Map::new()));
        Self {
            state: Mutex::new(TreeState {
                root,
                listeners: Vec::new(),
                next_id: 1,
            }),
            offline: AtomicBool::new(false),
            push_ids: PushIdGenerator::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Copy of the whole tree.
    pub fn export(&self) -> Value {
        self.lock().root.clone()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.listeners.retain(|l| !l.tx.is_closed());
        state.listeners.len()
    }

    /// Simulates losing the backend. Going offline fails every call and
    /// reports an error to every live subscription.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        if offline {
            let mut state = self.lock();
            state
                .listeners
                .retain(|l| l.tx.send(Err(RemoteError::Unavailable)).is_ok());
        }
    }

    fn lock(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn mutate(&self, segments: &[String], value: Option<Value>) {
        let mut state = self.lock();
        set_at(&mut state.root, segments, value.and_then(normalize));
        if !state.root.is_object() {
            state.root = Value::Object(Map::new());
        }
        notify(&mut state);
    }
}

/// Delivers fresh views to listeners whose view changed; drops dead ones.
fn notify(state: &mut TreeState) {
    let TreeState {
        root, listeners, ..
    } = state;
    listeners.retain_mut(|listener| {
        let view = view_at(root, &listener.segments, &listener.query);
        if view == listener.last {
            return !listener.tx.is_closed();
        }
        listener.last = view.clone();
        listener
            .tx
            .send(Ok(Snapshot::new(listener.path.clone(), view)))
            .is_ok()
    });
}

fn node_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.get(segment.as_str()))
}

fn view_at(root: &Value, segments: &[String], query: &Query) -> Option<Value> {
    let node = node_at(root, segments)?;
    match node {
        Value::Object(children) if !query.is_unbounded() => {
            let selected = query.apply(children);
            if selected.is_empty() {
                None
            } else {
                Some(Value::Object(selected))
            }
        }
        Value::Object(children) if children.is_empty() => None,
        other => Some(other.clone()),
    }
}

/// Strips nulls and empty objects. `None` when nothing is left.
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        other => Some(other),
    }
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn set_at(node: &mut Value, segments: &[String], value: Option<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value.unwrap_or(Value::Null);
        return;
    };

    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }

    if let Value::Object(map) = node {
        if rest.is_empty() {
            match value {
                Some(v) => {
                    map.insert(head.clone(), v);
                }
                None => {
                    map.remove(head);
                }
            }
            return;
        }

        if value.is_none() && !map.contains_key(head) {
            return;
        }
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
        let empty = is_empty_node(child);
        if empty {
            map.remove(head);
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn subscribe(&self, path: &str, query: Query) -> Result<Subscription, RemoteError> {
        self.check_online()?;
        let segments = split_path(path)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;

        let view = view_at(&state.root, &segments, &query);
        // The receiver is still in hand, so this cannot fail
        let _ = tx.send(Ok(Snapshot::new(path, view.clone())));
        state.listeners.push(Listener {
            id,
            path: path.to_string(),
            segments,
            query,
            last: view,
            tx,
        });
        tracing::debug!(subscription = id, path, "Subscribed");

        Ok(Subscription {
            id,
            path: path.to_string(),
            events: rx,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RemoteError> {
        self.lock().listeners.retain(|l| l.id != id);
        Ok(())
    }

    async fn push(&self, path: &str, record: Value) -> Result<String, RemoteError> {
        self.check_online()?;
        let mut segments = split_path(path)?;
        let key = self.push_ids.generate(self.clock.now_ms());
        segments.push(key.clone());
        self.mutate(&segments, Some(record));
        tracing::debug!(path = %child_path(path, &key), "Pushed record");
        Ok(key)
    }

    async fn write(&self, path: &str, record: Value) -> Result<(), RemoteError> {
        self.check_online()?;
        let segments = split_path(path)?;
        self.mutate(&segments, Some(record));
        Ok(())
    }

    async fn read_once(
        &self,
        path: &str,
        query: Option<Query>,
    ) -> Result<Option<Value>, RemoteError> {
        self.check_online()?;
        let segments = split_path(path)?;
        let state = self.lock();
        Ok(view_at(&state.root, &segments, &query.unwrap_or_default()))
    }

    async fn remove(&self, path: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        let segments = split_path(path)?;
        self.mutate(&segments, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_then_read() {
        let store = MemoryRemoteStore::new();
        let key = store
            .push("footprints/u1", json!({"carbonAmount": 2.3}))
            .await
            .unwrap();
        assert_eq!(key.len(), 20);

        let record = store
            .read_once(&child_path("footprints/u1", &key), None)
            .await
            .unwrap();
        assert_eq!(record, Some(json!({"carbonAmount": 2.3})));
        assert!(store.read_once("footprints/u2", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_prunes_empty_parents() {
        let store = MemoryRemoteStore::new();
        store.write("userScans/u1/s1", json!({"productId": "p1"})).await.unwrap();
        store.remove("userScans/u1/s1").await.unwrap();
        assert_eq!(store.export(), json!({}));

        // Removing something that never existed is a no-op
        store.remove("nothing/here").await.unwrap();
        assert_eq!(store.export(), json!({}));
    }

    #[tokio::test]
    async fn test_write_drops_null_fields() {
        let store = MemoryRemoteStore::new();
        store
            .write("dietPlans/u1/p1", json!({"name": "Plan", "description": null}))
            .await
            .unwrap();
        assert_eq!(
            store.read_once("dietPlans/u1/p1", None).await.unwrap(),
            Some(json!({"name": "Plan"}))
        );
        store.write("dietPlans/u1/p1", Value::Null).await.unwrap();
        assert!(store.read_once("dietPlans", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscription_delivers_initial_and_changes() {
        let store = MemoryRemoteStore::new();
        let mut sub = store.subscribe("footprints/u1", Query::new()).await.unwrap();

        let first = sub.next().await.unwrap().unwrap();
        assert!(first.is_empty());

        store.write("footprints/u1/e1", json!({"carbonAmount": 1})).await.unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.children().unwrap().len(), 1);

        // Writes elsewhere do not produce a snapshot here
        store.write("footprints/u2/e9", json!({"carbonAmount": 9})).await.unwrap();
        store.remove("footprints/u1/e1").await.unwrap();
        let third = sub.next().await.unwrap().unwrap();
        assert!(third.is_empty());
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_query_bounds_subscription() {
        let store = MemoryRemoteStore::new();
        for (key, ts) in [("a", 1), ("b", 2), ("c", 3)] {
            store
                .write(&format!("dietChat/u1/{}", key), json!({"timestamp": ts}))
                .await
                .unwrap();
        }
        let mut sub = store
            .subscribe("dietChat/u1", Query::new().order_by_child("timestamp").limit_to_last(2))
            .await
            .unwrap();
        let snapshot = sub.next().await.unwrap().unwrap();
        let mut keys: Vec<_> = snapshot.children().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let store = MemoryRemoteStore::new();
        let mut sub = store.subscribe("products", Query::new()).await.unwrap();
        sub.next().await.unwrap().unwrap();
        store.unsubscribe(sub.id).await.unwrap();
        store.write("products/p1", json!({"name": "Soap"})).await.unwrap();
        assert!(sub.next().await.is_none());
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_fails_calls_and_notifies() {
        let store = MemoryRemoteStore::new();
        let mut sub = store.subscribe("products", Query::new()).await.unwrap();
        sub.next().await.unwrap().unwrap();

        store.set_offline(true);
        assert_eq!(sub.next().await.unwrap(), Err(RemoteError::Unavailable));
        assert_eq!(
            store.write("products/p1", json!({})).await,
            Err(RemoteError::Unavailable)
        );
        store.set_offline(false);
        assert!(store.read_once("products", None).await.is_ok());
    }

    #[test]
    fn test_from_tree_normalizes() {
        let store = MemoryRemoteStore::from_tree(json!({"a": {"b": null}, "c": 1}));
        assert_eq!(store.export(), json!({"c": 1}));
    }
}
