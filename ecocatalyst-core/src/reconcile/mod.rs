//! Reconciliation engine.
//!
//! Turns remote snapshots into entity lists and runs one task per live
//! subscription that replaces a cache's backing list on every delivery.
//! The pure aggregate computations live in [`aggregate`].

pub mod aggregate;

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::cache::{Entity, EntityCache, Shape};
use crate::error::RemoteError;
use crate::identity::Owner;
use crate::remote::{last_segment, RemoteStore, Snapshot, SubscriptionId};
use crate::status::DB_CONNECTION_ERROR;

pub use aggregate::{
    evaluate_achievement, level_for_points, next_streak, parse_leaderboard, summarize_footprint,
};

/// Builds an entity from a keyed remote record. The key always wins over any
/// `id` stored inside the record.
pub fn entity_from_record<T: DeserializeOwned>(key: &str, record: Value) -> serde_json::Result<T> {
    let mut record = match record {
        Value::Object(map) => map,
        other => {
            return serde_json::from_value(other);
        }
    };
    record.insert("id".to_string(), Value::String(key.to_string()));
    serde_json::from_value(Value::Object(record))
}

/// Remote record of an entity: every field except `id`, which is the key.
pub fn record_from_entity<T: Serialize>(entity: &T) -> serde_json::Result<Value> {
    let mut value = serde_json::to_value(entity)?;
    if let Value::Object(map) = &mut value {
        map.remove("id");
    }
    Ok(value)
}

/// Flattens a snapshot into entities. Members that do not decode are logged
/// and skipped so one bad record cannot hide the rest of the collection.
pub fn entities_from_snapshot<T: DeserializeOwned>(snapshot: &Snapshot, shape: Shape) -> Vec<T> {
    let Some(value) = &snapshot.value else {
        return Vec::new();
    };
    match shape {
        Shape::Record => {
            let key = last_segment(&snapshot.path);
            match entity_from_record(key, value.clone()) {
                Ok(entity) => vec![entity],
                Err(e) => {
                    tracing::warn!(path = %snapshot.path, error = %e, "Skipping invalid record");
                    Vec::new()
                }
            }
        }
        Shape::Collection => {
            let Some(children) = snapshot.children() else {
                tracing::warn!(path = %snapshot.path, "Snapshot is not a collection");
                return Vec::new();
            };
            children
                .iter()
                .filter_map(|(key, record)| match entity_from_record(key, record.clone()) {
                    Ok(entity) => Some(entity),
                    Err(e) => {
                        tracing::warn!(path = %snapshot.path, key, error = %e, "Skipping invalid record");
                        None
                    }
                })
                .collect()
        }
    }
}

/// Runs after a snapshot has been applied to its cache.
pub type SnapshotHook = Arc<dyn Fn(Snapshot) -> BoxFuture<'static, ()> + Send + Sync>;

/// A live subscription feeding one cache.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    path: String,
    task: JoinHandle<()>,
    remote: Arc<dyn RemoteStore>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SubscriptionHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stops snapshot delivery, then releases the remote side. Once this
    /// returns the cache is no longer mutated by this subscription.
    pub async fn cancel(self) {
        self.task.abort();
        let _ = self.task.await;
        if let Err(e) = self.remote.unsubscribe(self.id).await {
            tracing::debug!(path = %self.path, error = %e, "Unsubscribe failed");
        }
    }
}

/// Subscribes `cache` to its remote path for `owner`.
///
/// Returns `Ok(None)` when the collection has no remote path for this owner
/// (per-owner collections while anonymous).
pub async fn subscribe_cache<T: Entity>(
    cache: &Arc<EntityCache<T>>,
    owner: &Owner,
    hook: Option<SnapshotHook>,
) -> Result<Option<SubscriptionHandle>, RemoteError> {
    let spec = cache.spec();
    let Some(path) = spec.remote.resolve(owner) else {
        return Ok(None);
    };
    let ctx = cache.context();
    let query = (spec.query)(&ctx.calendar, ctx.now());
    cache.status().set_loading(true);
    let subscription = match ctx.remote.subscribe(&path, query).await {
        Ok(subscription) => subscription,
        Err(e) => {
            cache.status().set_loading(false);
            return Err(e);
        }
    };
    tracing::debug!(kind = T::KIND, %path, "Subscribed cache");
    Ok(Some(spawn_subscription(
        cache.clone(),
        subscription,
        ctx.remote.clone(),
        hook,
    )))
}

/// Spawns the task applying every snapshot of `subscription` to `cache`.
pub fn spawn_subscription<T: Entity>(
    cache: Arc<EntityCache<T>>,
    mut subscription: crate::remote::Subscription,
    remote: Arc<dyn RemoteStore>,
    hook: Option<SnapshotHook>,
) -> SubscriptionHandle {
    let id = subscription.id;
    let path = subscription.path.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            match event {
                Ok(snapshot) => {
                    let count = cache.apply_snapshot(&snapshot).await;
                    tracing::debug!(kind = T::KIND, path = %snapshot.path, count, "Applied snapshot");
                    cache.status().set_loading(false);
                    if let Some(hook) = &hook {
                        hook(snapshot).await;
                    }
                }
                Err(e) => {
                    cache.status().fail(DB_CONNECTION_ERROR, &e);
                    cache.status().set_loading(false);
                }
            }
        }
        tracing::debug!(kind = T::KIND, "Subscription ended");
    });
    SubscriptionHandle {
        id,
        path,
        task,
        remote,
    }
}

/// All live subscriptions of one domain.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    handles: Mutex<Vec<SubscriptionHandle>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handle: SubscriptionHandle) {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tears every subscription down.
    pub async fn cancel_all(&self) {
        let handles: Vec<_> = {
            let mut guard = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for handle in handles {
            handle.cancel().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{unbounded_query, CollectionSpec, Frozen, RemotePath};
    use crate::context::SyncContext;
    use crate::identity::IdentityGate;
    use crate::local::{MemoryLocalStore, Namespace};
    use crate::remote::MemoryRemoteStore;
    use crate::status::DomainStatus;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
        rank: i64,
    }

    impl Entity for Item {
        const KIND: &'static str = "item";
        type Patch = Frozen;

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }
    }

    fn by_rank(a: &Item, b: &Item) -> std::cmp::Ordering {
        a.rank.cmp(&b.rank)
    }

    #[test]
    fn test_key_overrides_record_id() {
        let item: Item = entity_from_record("k1", json!({"id": "other", "rank": 3})).unwrap();
        assert_eq!(item.id, "k1");

        let record = record_from_entity(&item).unwrap();
        assert_eq!(record, json!({"rank": 3}));
    }

    #[test]
    fn test_record_shape_uses_last_segment() {
        let snapshot = Snapshot::new("userStats/u9", Some(json!({"rank": 1})));
        let items: Vec<Item> = entities_from_snapshot(&snapshot, Shape::Record);
        assert_eq!(items, vec![Item { id: "u9".into(), rank: 1 }]);

        let empty: Vec<Item> = entities_from_snapshot(&Snapshot::new("userStats/u9", None), Shape::Record);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_invalid_members_are_skipped() {
        let snapshot = Snapshot::new(
            "items",
            Some(json!({"a": {"rank": 2}, "b": {"rank": "high"}, "c": {"rank": 1}})),
        );
        let items: Vec<Item> = entities_from_snapshot(&snapshot, Shape::Collection);
        assert_eq!(items.len(), 2);
    }

    fn shared_cache(remote: Arc<MemoryRemoteStore>) -> Arc<EntityCache<Item>> {
        let ctx = SyncContext::new(
            Arc::new(MemoryLocalStore::new()),
            remote,
            IdentityGate::new(),
        );
        EntityCache::new(
            CollectionSpec {
                namespace: Namespace::CachedProducts,
                remote: RemotePath::Shared("items"),
                shape: Shape::Collection,
                order: by_rank,
                query: unbounded_query,
                local_capacity: None,
            },
            ctx,
            Arc::new(DomainStatus::new("items")),
        )
    }

    #[tokio::test]
    async fn test_subscription_replaces_and_sorts() {
        let remote = Arc::new(MemoryRemoteStore::from_tree(json!({
            "items": {"x": {"rank": 2}, "y": {"rank": 1}}
        })));
        let cache = shared_cache(remote.clone());
        let handle = subscribe_cache(&cache, &Owner::Anonymous, None)
            .await
            .unwrap()
            .unwrap();
        cache.await_snapshot_after(0).await;

        let ids: Vec<_> = cache.items().iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec!["y", "x"]);
        assert!(!cache.status().is_loading());

        let seen = cache.snapshot_count();
        remote.remove("items").await.unwrap();
        cache.await_snapshot_after(seen).await;
        assert!(cache.is_empty());

        handle.cancel().await;
        assert_eq!(remote.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_mutating() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let cache = shared_cache(remote.clone());
        let set = SubscriptionSet::new();
        set.add(
            subscribe_cache(&cache, &Owner::Anonymous, None)
                .await
                .unwrap()
                .unwrap(),
        );
        cache.await_snapshot_after(0).await;
        set.cancel_all().await;
        assert!(set.is_empty());

        remote.write("items/z", json!({"rank": 5})).await.unwrap();
        tokio::task::yield_now().await;
        assert!(cache.is_empty());
        assert_eq!(cache.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn test_subscription_error_sets_domain_error() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let cache = shared_cache(remote.clone());
        let handle = subscribe_cache(&cache, &Owner::Anonymous, None)
            .await
            .unwrap()
            .unwrap();
        cache.await_snapshot_after(0).await;

        remote.set_offline(true);
        for _ in 0..50 {
            if cache.status().error().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.status().error().as_deref(), Some(DB_CONNECTION_ERROR));
        handle.cancel().await;
    }

    #[tokio::test]
    async fn test_per_owner_path_needs_user() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let ctx = SyncContext::new(
            Arc::new(MemoryLocalStore::new()),
            remote,
            IdentityGate::new(),
        );
        let cache: Arc<EntityCache<Item>> = EntityCache::new(
            CollectionSpec {
                namespace: Namespace::RecentScans,
                remote: RemotePath::PerOwner("scans"),
                shape: Shape::Collection,
                order: by_rank,
                query: unbounded_query,
                local_capacity: None,
            },
            ctx,
            Arc::new(DomainStatus::new("scans")),
        );
        assert!(subscribe_cache(&cache, &Owner::Anonymous, None)
            .await
            .unwrap()
            .is_none());
    }
}
