//! Entity cache.
//!
//! One `EntityCache` holds one domain collection in memory and keeps it
//! consistent with the local store and, when a user is signed in, with the
//! remote store. It is the process-wide source of truth; the local store is
//! only a warm-start cache.
//!
//! # Write modes
//!
//! - **Local-only** (anonymous): the in-memory list is updated immediately
//!   and the whole collection is persisted. New ids are `local_<timestamp>`.
//! - **Connected**: the write goes to the remote store first. Once it is
//!   acknowledged the change is shown through an optimistic overlay, which
//!   the next snapshot containing (or, for deletes, lacking) the id retires.
//!   Use [`EntityCache::await_next_snapshot`] to wait for the authoritative
//!   state.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::clock::Calendar;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::identity::Owner;
use crate::local::{load_collection, save_collection, Namespace};
use crate::reconcile::{entities_from_snapshot, entity_from_record, record_from_entity};
use crate::remote::{child_path, last_segment, Query, Snapshot};
use crate::status::DomainStatus;

/// A record stored in an entity cache.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Human-readable kind, used in `NotFound` errors.
    const KIND: &'static str;

    /// Typed partial update accepted by [`EntityCache::update`].
    type Patch: Patch<Self>;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Identity that created the entity. Shared collections have none.
    fn owner_id(&self) -> Option<&str> {
        None
    }
}

/// Partial update merged onto the last full record.
pub trait Patch<T>: DeserializeOwned + Send + 'static {
    /// Applies the set fields and refreshes the entity's update marker.
    fn apply_to(self, target: &mut T, now: i64);
}

/// Patch type of read-only entities. It has no values, so it can never be
/// constructed or deserialized.
#[derive(Debug, Deserialize)]
pub enum Frozen {}

impl<T> Patch<T> for Frozen {
    fn apply_to(self, _target: &mut T, _now: i64) {
        match self {}
    }
}

/// Validates a JSON object against an entity's patch schema.
pub fn parse_patch<T: Entity>(value: Value) -> SyncResult<T::Patch> {
    serde_json::from_value(value).map_err(|e| SyncError::InvalidPatch(e.to_string()))
}

/// Where a collection lives in the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePath {
    /// Same path for everyone, e.g. `products`
    Shared(&'static str),
    /// `<prefix>/<ownerId>`, only available with a signed-in user
    PerOwner(&'static str),
}

impl RemotePath {
    pub fn resolve(&self, owner: &Owner) -> Option<String> {
        match self {
            RemotePath::Shared(path) => Some(path.to_string()),
            RemotePath::PerOwner(prefix) => owner.user_id().map(|id| child_path(prefix, id)),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, RemotePath::Shared(_))
    }
}

/// Layout of the remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Keyed children, one entity per key
    Collection,
    /// The node itself is a single entity whose id is the last path segment
    Record,
}

/// Static description of one domain collection.
pub struct CollectionSpec<T> {
    pub namespace: Namespace,
    pub remote: RemotePath,
    pub shape: Shape,
    /// Domain sort order of the visible list.
    pub order: fn(&T, &T) -> Ordering,
    /// Bounds of the remote subscription, given the calendar and "now".
    pub query: fn(&Calendar, i64) -> Query,
    /// Maximum number of entities kept, counted in sort order.
    pub local_capacity: Option<usize>,
}

impl<T> Clone for CollectionSpec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CollectionSpec<T> {}

/// Subscription query without bounds.
pub fn unbounded_query(_calendar: &Calendar, _now: i64) -> Query {
    Query::new()
}

/// Values handed to entity builders on create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub owner_id: String,
    pub now: i64,
}

struct CacheState<T> {
    items: Vec<T>,
    /// Acknowledged remote writes not yet confirmed by a snapshot.
    /// `None` hides the id.
    overlay: Vec<(String, Option<T>)>,
}

type ChangeListener<T> = Box<dyn Fn(&[T]) + Send + Sync>;

pub struct EntityCache<T: Entity> {
    spec: CollectionSpec<T>,
    ctx: SyncContext,
    status: Arc<DomainStatus>,
    state: Mutex<CacheState<T>>,
    view: watch::Sender<Arc<Vec<T>>>,
    snapshots: watch::Sender<u64>,
    listeners: Mutex<Vec<ChangeListener<T>>>,
}

impl<T: Entity> std::fmt::Debug for EntityCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("kind", &T::KIND)
            .field("namespace", &self.spec.namespace)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn same_record<T: Serialize>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn field_matches<T: Serialize>(entity: &T, field: &str, value: &Value) -> bool {
    serde_json::to_value(entity)
        .ok()
        .and_then(|v| v.get(field).cloned())
        .is_some_and(|v| &v == value)
}

impl<T: Entity> EntityCache<T> {
    pub fn new(spec: CollectionSpec<T>, ctx: SyncContext, status: Arc<DomainStatus>) -> Arc<Self> {
        let (view, _) = watch::channel(Arc::new(Vec::new()));
        let (snapshots, _) = watch::channel(0);
        Arc::new(Self {
            spec,
            ctx,
            status,
            state: Mutex::new(CacheState {
                items: Vec::new(),
                overlay: Vec::new(),
            }),
            view,
            snapshots,
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn spec(&self) -> &CollectionSpec<T> {
        &self.spec
    }

    pub fn status(&self) -> &Arc<DomainStatus> {
        &self.status
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    // ---- synchronous reads ----

    /// Current visible collection, in domain order.
    pub fn items(&self) -> Arc<Vec<T>> {
        self.view.borrow().clone()
    }

    /// Receives every new visible collection.
    pub fn watch(&self) -> watch::Receiver<Arc<Vec<T>>> {
        self.view.subscribe()
    }

    pub fn len(&self) -> usize {
        self.view.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.borrow().is_empty()
    }

    pub fn first(&self) -> Option<T> {
        self.view.borrow().first().cloned()
    }

    pub fn find_by_id(&self, id: &str) -> Option<T> {
        self.find(|entity| entity.id() == id)
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.view.borrow().iter().find(|e| predicate(e)).cloned()
    }

    pub fn filter(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.view
            .borrow()
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    /// Runs `listener` with the visible collection after every change.
    pub fn on_change(&self, listener: impl Fn(&[T]) + Send + Sync + 'static) {
        lock(&self.listeners).push(Box::new(listener));
    }

    /// Number of snapshots applied so far.
    pub fn snapshot_count(&self) -> u64 {
        *self.snapshots.borrow()
    }

    /// Resolves once a snapshot newer than `seen` has been applied.
    pub async fn await_snapshot_after(&self, seen: u64) -> u64 {
        let mut rx = self.snapshots.subscribe();
        let result = rx.wait_for(|count| *count > seen).await.map(|count| *count);
        result.unwrap_or(seen)
    }

    /// Resolves after the next snapshot has been applied.
    pub async fn await_next_snapshot(&self) -> u64 {
        let seen = self.snapshot_count();
        self.await_snapshot_after(seen).await
    }

    // ---- internal state handling ----

    fn normalize(&self, items: &mut Vec<T>) {
        items.sort_by(self.spec.order);
        if let Some(capacity) = self.spec.local_capacity {
            items.truncate(capacity);
        }
    }

    fn merged(&self, state: &CacheState<T>) -> Vec<T> {
        let mut list = state.items.clone();
        for (id, pending) in &state.overlay {
            let position = list.iter().position(|e| e.id() == id);
            match (pending, position) {
                (Some(entity), Some(i)) => list[i] = entity.clone(),
                (Some(entity), None) => list.push(entity.clone()),
                (None, Some(i)) => {
                    list.remove(i);
                }
                (None, None) => {}
            }
        }
        self.normalize(&mut list);
        list
    }

    /// Publishes the merged view and notifies change listeners.
    fn publish(&self) -> Arc<Vec<T>> {
        let visible = {
            let state = lock(&self.state);
            Arc::new(self.merged(&state))
        };
        self.view.send_replace(visible.clone());
        for listener in lock(&self.listeners).iter() {
            listener(&visible);
        }
        visible
    }

    async fn persist(&self, items: &[T]) {
        if let Err(e) = save_collection(self.ctx.local.as_ref(), self.spec.namespace, items).await {
            tracing::warn!(
                namespace = %self.spec.namespace,
                error = %e,
                "Failed to persist collection"
            );
        }
    }

    /// `<prefix>_<now>`, suffixed with `_1`, `_2`, ... while that id is
    /// already in the collection.
    pub fn unique_id(&self, prefix: &str, now: i64) -> String {
        let state = lock(&self.state);
        let taken = |id: &str| state.items.iter().any(|e| e.id() == id);
        let base = format!("{}_{}", prefix, now);
        let mut candidate = base.clone();
        let mut n = 0;
        while taken(&candidate) {
            n += 1;
            candidate = format!("{}_{}", base, n);
        }
        candidate
    }

    /// Remote base path for writes, `None` in local-only mode.
    pub fn write_base(&self, owner: &Owner) -> Option<String> {
        if owner.is_anonymous() {
            None
        } else {
            self.spec.remote.resolve(owner)
        }
    }

    fn entity_path(&self, base: &str, id: &str) -> String {
        match self.spec.shape {
            Shape::Collection => child_path(base, id),
            Shape::Record => base.to_string(),
        }
    }

    fn decode(&self, key: &str, record: Value, path: &str) -> SyncResult<T> {
        entity_from_record(key, record).map_err(|e| SyncError::InvalidRecord {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn overlay_upsert(&self, entity: T) {
        {
            let mut state = lock(&self.state);
            let id = entity.id().to_string();
            state.overlay.retain(|(pending, _)| *pending != id);
            let confirmed = state
                .items
                .iter()
                .any(|e| e.id() == id && same_record(e, &entity));
            if !confirmed {
                state.overlay.push((id, Some(entity)));
            }
        }
        self.publish();
    }

    fn overlay_remove(&self, id: &str) {
        {
            let mut state = lock(&self.state);
            state.overlay.retain(|(pending, _)| pending != id);
            if state.items.iter().any(|e| e.id() == id) {
                state.overlay.push((id.to_string(), None));
            }
        }
        self.publish();
    }

    // ---- warm start and reconciliation ----

    /// Seeds the collection from the local store. Returns the number of
    /// entities loaded.
    pub async fn warm_start(&self) -> usize {
        match load_collection::<T>(self.ctx.local.as_ref(), self.spec.namespace).await {
            Ok(Some(mut items)) => {
                self.normalize(&mut items);
                lock(&self.state).items = items;
                let visible = self.publish();
                tracing::debug!(namespace = %self.spec.namespace, count = visible.len(), "Warm start");
                visible.len()
            }
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(
                    namespace = %self.spec.namespace,
                    error = %e,
                    "Failed to load cached collection"
                );
                0
            }
        }
    }

    /// Replaces the backing list with an authoritative snapshot.
    pub async fn apply_snapshot(&self, snapshot: &Snapshot) -> usize {
        let mut entities: Vec<T> = entities_from_snapshot(snapshot, self.spec.shape);
        {
            let mut state = lock(&self.state);
            let present: HashSet<&str> = entities.iter().map(|e| e.id()).collect();
            state.overlay.retain(|(id, pending)| match pending {
                Some(_) => !present.contains(id.as_str()),
                None => present.contains(id.as_str()),
            });
            self.normalize(&mut entities);
            state.items = entities;
        }
        let visible = self.publish();
        self.persist(&visible).await;
        self.snapshots.send_modify(|count| *count += 1);
        visible.len()
    }

    // ---- local mutations ----

    /// Inserts at the head of the collection (replacing any entity with the
    /// same id) and persists.
    pub async fn insert_local(&self, entity: T) {
        {
            let mut state = lock(&self.state);
            let mut items = std::mem::take(&mut state.items);
            items.retain(|e| e.id() != entity.id());
            items.insert(0, entity);
            self.normalize(&mut items);
            state.items = items;
        }
        let visible = self.publish();
        self.persist(&visible).await;
    }

    /// Replaces the entity with the same id, or appends it, and persists.
    pub async fn upsert_local(&self, entity: T) {
        {
            let mut state = lock(&self.state);
            let mut items = std::mem::take(&mut state.items);
            match items.iter().position(|e| e.id() == entity.id()) {
                Some(i) => items[i] = entity,
                None => items.push(entity),
            }
            self.normalize(&mut items);
            state.items = items;
        }
        let visible = self.publish();
        self.persist(&visible).await;
    }

    /// Empties the collection and removes its local store key.
    pub async fn clear(&self) {
        {
            let mut state = lock(&self.state);
            state.items.clear();
            state.overlay.clear();
        }
        self.publish();
        if let Err(e) = self.ctx.local.remove(self.spec.namespace.key()).await {
            tracing::warn!(namespace = %self.spec.namespace, error = %e, "Failed to clear cached collection");
        }
    }

    /// Drops entities created by anyone other than `owner`, together with
    /// any pending overlay. Returns how many entities were evicted.
    pub async fn evict_foreign(&self, owner: &Owner) -> usize {
        let evicted = {
            let mut state = lock(&self.state);
            state.overlay.clear();
            let before = state.items.len();
            state
                .items
                .retain(|e| e.owner_id().map_or(true, |id| id == owner.id()));
            before - state.items.len()
        };
        let visible = self.publish();
        if evicted > 0 {
            tracing::info!(kind = T::KIND, evicted, owner = %owner, "Evicted entities of previous identity");
            self.persist(&visible).await;
        }
        evicted
    }

    // ---- read-through fills ----

    /// Finds by id, falling back to a point lookup in the remote store.
    pub async fn fetch_by_id(&self, id: &str) -> SyncResult<Option<T>> {
        if let Some(found) = self.find_by_id(id) {
            return Ok(Some(found));
        }
        let owner = self.ctx.identity.current();
        let Some(base) = self.spec.remote.resolve(&owner) else {
            return Ok(None);
        };
        let path = self.entity_path(&base, id);
        let Some(record) = self.ctx.remote.read_once(&path, None).await? else {
            return Ok(None);
        };
        let entity = self.decode(id, record, &path)?;
        self.upsert_local(entity.clone()).await;
        Ok(Some(entity))
    }

    /// Finds by a field value, falling back to an equality query against the
    /// remote store.
    pub async fn fetch_by_field(&self, field: &str, value: Value) -> SyncResult<Option<T>> {
        if let Some(found) = self.find(|e| field_matches(e, field, &value)) {
            return Ok(Some(found));
        }
        let owner = self.ctx.identity.current();
        let Some(base) = self.spec.remote.resolve(&owner) else {
            return Ok(None);
        };
        let query = Query::new().order_by_child(field).equal_to(value);
        let Some(Value::Object(matches)) = self.ctx.remote.read_once(&base, Some(query)).await?
        else {
            return Ok(None);
        };
        let Some((key, record)) = matches.into_iter().next() else {
            return Ok(None);
        };
        let entity = self.decode(&key, record, &child_path(&base, &key))?;
        self.upsert_local(entity.clone()).await;
        Ok(Some(entity))
    }

    // ---- writes ----

    /// Creates an entity built from the current owner and time.
    pub async fn create(&self, build: impl FnOnce(Stamp) -> T) -> SyncResult<T> {
        let owner = self.ctx.identity.current();
        let now = self.ctx.now();
        let mut entity = build(Stamp {
            owner_id: owner.id().to_string(),
            now,
        });

        let Some(base) = self.write_base(&owner) else {
            entity.set_id(self.unique_id("local", now));
            self.insert_local(entity.clone()).await;
            return Ok(entity);
        };

        match self.spec.shape {
            Shape::Collection => {
                let record = record_from_entity(&entity).map_err(|e| SyncError::InvalidRecord {
                    path: base.clone(),
                    reason: e.to_string(),
                })?;
                let key = self.ctx.remote.push(&base, record).await?;
                entity.set_id(key);
            }
            Shape::Record => {
                entity.set_id(last_segment(&base).to_string());
                self.write_record(&base, &entity).await?;
            }
        }
        tracing::debug!(kind = T::KIND, id = entity.id(), "Created remote entity");
        self.overlay_upsert(entity.clone());
        Ok(entity)
    }

    /// Merges `patch` onto the last full record of `id`.
    pub async fn update(&self, id: &str, patch: T::Patch) -> SyncResult<T> {
        let owner = self.ctx.identity.current();
        let now = self.ctx.now();

        let Some(base) = self.write_base(&owner) else {
            let updated = {
                let mut state = lock(&self.state);
                let Some(entity) = state.items.iter_mut().find(|e| e.id() == id) else {
                    return Err(SyncError::not_found(T::KIND, id));
                };
                patch.apply_to(entity, now);
                let updated = entity.clone();
                let mut items = std::mem::take(&mut state.items);
                self.normalize(&mut items);
                state.items = items;
                updated
            };
            let visible = self.publish();
            self.persist(&visible).await;
            return Ok(updated);
        };

        let path = self.entity_path(&base, id);
        let key = last_segment(&path).to_string();
        let current = self
            .ctx
            .remote
            .read_once(&path, None)
            .await?
            .ok_or_else(|| SyncError::not_found(T::KIND, id))?;
        let mut entity = self.decode(&key, current, &path)?;
        patch.apply_to(&mut entity, now);
        self.write_record(&path, &entity).await?;
        self.overlay_upsert(entity.clone());
        Ok(entity)
    }

    /// Removes `id`.
    pub async fn delete(&self, id: &str) -> SyncResult<()> {
        let owner = self.ctx.identity.current();

        let Some(base) = self.write_base(&owner) else {
            let removed = {
                let mut state = lock(&self.state);
                let before = state.items.len();
                state.items.retain(|e| e.id() != id);
                before != state.items.len()
            };
            if !removed {
                return Err(SyncError::not_found(T::KIND, id));
            }
            let visible = self.publish();
            self.persist(&visible).await;
            return Ok(());
        };

        let path = self.entity_path(&base, id);
        if self.ctx.remote.read_once(&path, None).await?.is_none() {
            return Err(SyncError::not_found(T::KIND, id));
        }
        self.ctx.remote.remove(&path).await?;
        self.overlay_remove(id);
        Ok(())
    }

    /// Writes the full record of `entity` (without its id) to `path`.
    pub async fn write_record(&self, path: &str, entity: &T) -> SyncResult<()> {
        let record = record_from_entity(entity).map_err(|e| SyncError::InvalidRecord {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        self.ctx.remote.write(path, record).await?;
        Ok(())
    }

    /// Pushes an already built entity under a new remote key and shows it
    /// right away. Fails with `Unavailable` in local-only mode.
    pub async fn push_record(&self, mut entity: T) -> SyncResult<T> {
        let owner = self.ctx.identity.current();
        let base = self
            .write_base(&owner)
            .ok_or(crate::error::RemoteError::Unavailable)?;
        let record = record_from_entity(&entity).map_err(|e| SyncError::InvalidRecord {
            path: base.clone(),
            reason: e.to_string(),
        })?;
        let key = self.ctx.remote.push(&base, record).await?;
        entity.set_id(key);
        self.overlay_upsert(entity.clone());
        Ok(entity)
    }

    /// Writes `entity` to the owner's remote record and shows it right away.
    /// Only meaningful for [`Shape::Record`] collections.
    pub async fn write_owned_record(&self, owner: &Owner, mut entity: T) -> SyncResult<T> {
        let base = self
            .write_base(owner)
            .ok_or(crate::error::RemoteError::Unavailable)?;
        entity.set_id(last_segment(&base).to_string());
        self.write_record(&base, &entity).await?;
        self.overlay_upsert(entity.clone());
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RemoteError;
    use crate::identity::IdentityGate;
    use crate::local::{LocalStore, MemoryLocalStore};
    use crate::reconcile::subscribe_cache;
    use crate::remote::{MemoryRemoteStore, RemoteStore};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Note {
        id: String,
        user_id: String,
        text: String,
        timestamp: i64,
        #[serde(default)]
        updated_at: i64,
    }

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct NotePatch {
        text: Option<String>,
    }

    impl Patch<Note> for NotePatch {
        fn apply_to(self, target: &mut Note, now: i64) {
            if let Some(text) = self.text {
                target.text = text;
            }
            target.updated_at = now;
        }
    }

    impl Entity for Note {
        const KIND: &'static str = "note";
        type Patch = NotePatch;

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }

        fn owner_id(&self) -> Option<&str> {
            Some(&self.user_id)
        }
    }

    fn newest_first(a: &Note, b: &Note) -> Ordering {
        b.timestamp.cmp(&a.timestamp)
    }

    fn spec(capacity: Option<usize>) -> CollectionSpec<Note> {
        CollectionSpec {
            namespace: Namespace::FootprintEntries,
            remote: RemotePath::PerOwner("notes"),
            shape: Shape::Collection,
            order: newest_first,
            query: unbounded_query,
            local_capacity: capacity,
        }
    }

    struct Fixture {
        local: Arc<MemoryLocalStore>,
        remote: Arc<MemoryRemoteStore>,
        clock: Arc<ManualClock>,
        identity: IdentityGate,
        cache: Arc<EntityCache<Note>>,
    }

    fn fixture(capacity: Option<usize>) -> Fixture {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let identity = IdentityGate::new();
        let ctx = SyncContext::new(local.clone(), remote.clone(), identity.clone())
            .with_clock(clock.clone());
        let cache = EntityCache::new(spec(capacity), ctx, Arc::new(DomainStatus::new("notes")));
        Fixture {
            local,
            remote,
            clock,
            identity,
            cache,
        }
    }

    fn note(text: &str) -> impl FnOnce(Stamp) -> Note + '_ {
        move |stamp| Note {
            id: String::new(),
            user_id: stamp.owner_id,
            text: text.to_string(),
            timestamp: stamp.now,
            updated_at: stamp.now,
        }
    }

    #[tokio::test]
    async fn test_local_create_then_find() {
        let f = fixture(None);
        let created = f.cache.create(note("hello")).await.unwrap();

        assert_eq!(created.id, "local_1000");
        assert_eq!(created.user_id, "anonymous");
        let found = f.cache.find_by_id("local_1000").unwrap();
        assert_eq!(found, created);
        assert!(f.local.peek(Namespace::FootprintEntries.key()).unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn test_local_ids_stay_unique_within_a_millisecond() {
        let f = fixture(None);
        let a = f.cache.create(note("a")).await.unwrap();
        let b = f.cache.create(note("b")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.id, "local_1000_1");
        assert_eq!(f.cache.len(), 2);
    }

    #[tokio::test]
    async fn test_local_delete_then_find_is_absent() {
        let f = fixture(None);
        let created = f.cache.create(note("bye")).await.unwrap();
        f.cache.delete(&created.id).await.unwrap();
        assert!(f.cache.find_by_id(&created.id).is_none());
        assert!(f.cache.delete(&created.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_local_update_merges_patch() {
        let f = fixture(None);
        let created = f.cache.create(note("draft")).await.unwrap();
        f.clock.advance(500);

        let patch = parse_patch::<Note>(json!({"text": "final"})).unwrap();
        let updated = f.cache.update(&created.id, patch).await.unwrap();
        assert_eq!(updated.text, "final");
        assert_eq!(updated.timestamp, 1_000);
        assert_eq!(updated.updated_at, 1_500);

        let missing = parse_patch::<Note>(json!({})).unwrap();
        assert!(f.cache.update("nope", missing).await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let err = parse_patch::<Note>(json!({"txt": "typo"})).unwrap_err();
        assert!(matches!(err, SyncError::InvalidPatch(_)));
    }

    #[tokio::test]
    async fn test_capacity_keeps_newest() {
        let f = fixture(Some(2));
        for text in ["one", "two", "three"] {
            f.cache.create(note(text)).await.unwrap();
            f.clock.advance(10);
        }
        let texts: Vec<_> = f.cache.items().iter().map(|n| n.text.clone()).collect();
        assert_eq!(texts, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn test_local_store_failure_does_not_block_memory() {
        let f = fixture(None);
        f.local.set_failing(true);
        f.cache.create(note("kept")).await.unwrap();
        assert_eq!(f.cache.len(), 1);
        assert_eq!(f.cache.warm_start().await, 0);
    }

    #[tokio::test]
    async fn test_warm_start_seeds_from_local_store() {
        let f = fixture(None);
        f.local
            .set(
                Namespace::FootprintEntries.key(),
                r#"[{"id":"a","userId":"anonymous","text":"old","timestamp":1},
                    {"id":"b","userId":"anonymous","text":"new","timestamp":2}]"#,
            )
            .await
            .unwrap();
        assert_eq!(f.cache.warm_start().await, 2);
        assert_eq!(f.cache.first().unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_connected_create_uses_remote_key_and_overlay() {
        let f = fixture(None);
        f.identity.sign_in("u1");

        let created = f.cache.create(note("remote")).await.unwrap();
        assert_eq!(created.id.len(), 20);
        assert_eq!(created.user_id, "u1");

        // Visible before any snapshot arrives
        assert!(f.cache.find_by_id(&created.id).is_some());

        let stored = f
            .remote
            .read_once(&format!("notes/u1/{}", created.id), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["text"], "remote");
        assert!(stored.get("id").is_none());
    }

    #[tokio::test]
    async fn test_connected_update_missing_is_not_found() {
        let f = fixture(None);
        f.identity.sign_in("u1");
        let patch = parse_patch::<Note>(json!({"text": "x"})).unwrap();
        let err = f.cache.update("ghost", patch).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(f.remote.read_once("notes/u1/ghost", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connected_writes_fail_without_mutation_when_offline() {
        let f = fixture(None);
        f.identity.sign_in("u1");
        let created = f.cache.create(note("kept")).await.unwrap();
        let before = f.cache.items();
        let pending = lock(&f.cache.state).overlay.len();
        assert_eq!(pending, 1);

        f.remote.set_offline(true);
        f.clock.advance(10);

        let err = f.cache.create(note("lost")).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::Unavailable)));
        let patch = parse_patch::<Note>(json!({"text": "changed"})).unwrap();
        let err = f.cache.update(&created.id, patch).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        let err = f.cache.delete(&created.id).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));

        assert_eq!(*f.cache.items(), *before);
        assert_eq!(lock(&f.cache.state).overlay.len(), pending);
        assert_eq!(f.cache.find_by_id(&created.id).unwrap().text, "kept");

        f.remote.set_offline(false);
        let stored = f
            .remote
            .read_once(&format!("notes/u1/{}", created.id), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["text"], "kept");
    }

    #[tokio::test]
    async fn test_snapshot_reconciles_overlay() {
        let f = fixture(None);
        f.identity.sign_in("u1");
        let handle = subscribe_cache(&f.cache, &f.identity.current(), None)
            .await
            .unwrap()
            .unwrap();
        f.cache.await_snapshot_after(0).await;

        let seen = f.cache.snapshot_count();
        let created = f.cache.create(note("synced")).await.unwrap();
        f.cache.await_snapshot_after(seen).await;
        assert_eq!(f.cache.len(), 1);
        assert_eq!(f.cache.find_by_id(&created.id).unwrap().text, "synced");

        let seen = f.cache.snapshot_count();
        f.cache.delete(&created.id).await.unwrap();
        assert!(f.cache.find_by_id(&created.id).is_none());
        f.cache.await_snapshot_after(seen).await;
        assert!(f.cache.is_empty());

        handle.cancel().await;
    }

    #[tokio::test]
    async fn test_empty_snapshot_replaces_collection() {
        let f = fixture(None);
        f.cache.create(note("stale")).await.unwrap();
        assert_eq!(f.cache.len(), 1);

        f.cache
            .apply_snapshot(&Snapshot::new("notes/u1", None))
            .await;
        assert!(f.cache.is_empty());
        assert_eq!(f.local.peek(Namespace::FootprintEntries.key()).as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_snapshot_key_overrides_record_id() {
        let f = fixture(None);
        f.cache
            .apply_snapshot(&Snapshot::new(
                "notes/u1",
                Some(json!({
                    "k1": {"id": "bogus", "userId": "u1", "text": "a", "timestamp": 5},
                    "k2": {"userId": "u1", "text": "b", "timestamp": 9},
                    "bad": {"text": "missing fields"},
                })),
            ))
            .await;
        let ids: Vec<_> = f.cache.items().iter().map(|n| n.id.clone()).collect();
        assert_eq!(ids, vec!["k2", "k1"]);
    }

    #[tokio::test]
    async fn test_fetch_by_field_fills_cache() {
        let f = fixture(None);
        f.identity.sign_in("u1");
        f.remote
            .write(
                "notes/u1/n7",
                json!({"userId": "u1", "text": "needle", "timestamp": 3}),
            )
            .await
            .unwrap();

        let found = f
            .cache
            .fetch_by_field("text", json!("needle"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "n7");
        assert!(f.cache.find_by_id("n7").is_some());
        assert!(f
            .cache
            .fetch_by_field("text", json!("hay"))
            .await
            .unwrap()
            .is_none());
        assert!(f.cache.fetch_by_id("n7").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_evict_foreign_and_listeners() {
        let f = fixture(None);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        f.cache.on_change(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        f.cache.create(note("mine")).await.unwrap();
        assert_eq!(f.cache.evict_foreign(&Owner::User("u1".into())).await, 1);
        assert!(f.cache.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_removes_local_key() {
        let f = fixture(None);
        f.cache.create(note("x")).await.unwrap();
        assert!(f.local.contains(Namespace::FootprintEntries.key()));
        f.cache.clear().await;
        assert!(f.cache.is_empty());
        assert!(!f.local.contains(Namespace::FootprintEntries.key()));
    }
}
