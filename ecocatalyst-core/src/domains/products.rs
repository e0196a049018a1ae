use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::{attach, report, Domain};
use crate::cache::{unbounded_query, CollectionSpec, EntityCache, RemotePath, Shape};
use crate::clock::Calendar;
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::identity::Owner;
use crate::local::Namespace;
use crate::models::{AlternativeProduct, Location, Product, ProductScan};
use crate::reconcile::{entities_from_snapshot, SubscriptionSet};
use crate::remote::{child_path, Query, Snapshot};
use crate::status::DomainStatus;

/// Number of scans kept per user.
pub const RECENT_SCAN_LIMIT: usize = 10;

fn by_id(a: &Product, b: &Product) -> Ordering {
    a.id.cmp(&b.id)
}

fn newest_first(a: &ProductScan, b: &ProductScan) -> Ordering {
    b.timestamp.cmp(&a.timestamp)
}

fn last_scans(_calendar: &Calendar, _now: i64) -> Query {
    Query::new()
        .order_by_child("timestamp")
        .limit_to_last(RECENT_SCAN_LIMIT)
}

pub const PRODUCTS: CollectionSpec<Product> = CollectionSpec {
    namespace: Namespace::CachedProducts,
    remote: RemotePath::Shared("products"),
    shape: Shape::Collection,
    order: by_id,
    query: unbounded_query,
    local_capacity: None,
};

pub const SCANS: CollectionSpec<ProductScan> = CollectionSpec {
    namespace: Namespace::RecentScans,
    remote: RemotePath::PerOwner("userScans"),
    shape: Shape::Collection,
    order: newest_first,
    query: last_scans,
    local_capacity: Some(RECENT_SCAN_LIMIT),
};

/// Product catalogue, recent scans and eco-friendly alternatives.
pub struct ProductsService {
    ctx: SyncContext,
    status: Arc<DomainStatus>,
    products: Arc<EntityCache<Product>>,
    scans: Arc<EntityCache<ProductScan>>,
    alternatives: Mutex<HashMap<String, Vec<AlternativeProduct>>>,
    catalogue: SubscriptionSet,
    subscriptions: SubscriptionSet,
}

impl ProductsService {
    pub fn new(ctx: SyncContext) -> Self {
        let status = Arc::new(DomainStatus::new("products"));
        Self {
            products: EntityCache::new(PRODUCTS, ctx.clone(), status.clone()),
            scans: EntityCache::new(SCANS, ctx.clone(), status.clone()),
            ctx,
            status,
            alternatives: Mutex::new(HashMap::new()),
            catalogue: SubscriptionSet::new(),
            subscriptions: SubscriptionSet::new(),
        }
    }

    pub fn products_cache(&self) -> &Arc<EntityCache<Product>> {
        &self.products
    }

    pub fn scans_cache(&self) -> &Arc<EntityCache<ProductScan>> {
        &self.scans
    }

    pub fn products(&self) -> Arc<Vec<Product>> {
        self.products.items()
    }

    pub fn recent_scans(&self) -> Arc<Vec<ProductScan>> {
        self.scans.items()
    }

    /// Looks a product up by barcode while flagging the domain as loading.
    pub async fn scan_product(&self, barcode: &str) -> Option<Product> {
        self.status.set_loading(true);
        let result = self.find_by_barcode(barcode).await;
        self.status.set_loading(false);
        report(&self.status, "Failed to scan product. Please try again.", result).flatten()
    }

    pub async fn product_by_id(&self, id: &str) -> Option<Product> {
        let result = self.products.fetch_by_id(id).await;
        report(
            &self.status,
            "Failed to get product details. Please try again.",
            result,
        )
        .flatten()
    }

    pub async fn product_by_barcode(&self, barcode: &str) -> Option<Product> {
        let result = self.find_by_barcode(barcode).await;
        report(
            &self.status,
            "Failed to get product details. Please try again.",
            result,
        )
        .flatten()
    }

    async fn find_by_barcode(&self, barcode: &str) -> SyncResult<Option<Product>> {
        self.products
            .fetch_by_field("barcode", Value::String(barcode.to_string()))
            .await
    }

    /// Alternatives stored under `alternatives/<productId>`. Non-empty
    /// answers are kept in memory for the rest of the session.
    pub async fn alternatives_for(&self, product_id: &str) -> Vec<AlternativeProduct> {
        if let Some(cached) = self.lock_alternatives().get(product_id) {
            return cached.clone();
        }
        let result = self.read_alternatives(product_id).await;
        let alternatives = report(
            &self.status,
            "Failed to get eco-friendly alternatives. Please try again.",
            result,
        )
        .unwrap_or_default();
        if !alternatives.is_empty() {
            self.lock_alternatives()
                .insert(product_id.to_string(), alternatives.clone());
        }
        alternatives
    }

    async fn read_alternatives(&self, product_id: &str) -> SyncResult<Vec<AlternativeProduct>> {
        let path = child_path("alternatives", product_id);
        let value = self.ctx.remote.read_once(&path, None).await?;
        Ok(entities_from_snapshot(
            &Snapshot::new(path, value),
            Shape::Collection,
        ))
    }

    fn lock_alternatives(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Vec<AlternativeProduct>>> {
        self.alternatives
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a scan. Only the most recent scans are kept.
    pub async fn add_scan(&self, product_id: &str, location: Option<Location>) -> bool {
        let result = self
            .scans
            .create(|stamp| ProductScan {
                id: String::new(),
                product_id: product_id.to_string(),
                user_id: stamp.owner_id,
                timestamp: stamp.now,
                location,
            })
            .await;
        report(&self.status, "Failed to save scan. Please try again.", result).is_some()
    }

    /// Forgets every scan locally and, when connected, remotely.
    pub async fn clear_recent_scans(&self) -> bool {
        self.scans.clear().await;
        let owner = self.ctx.identity.current();
        let Some(path) = self.scans.write_base(&owner) else {
            return true;
        };
        let result = self.ctx.remote.remove(&path).await.map_err(Into::into);
        report(
            &self.status,
            "Failed to clear scan history. Please try again.",
            result,
        )
        .is_some()
    }
}

#[async_trait]
impl Domain for ProductsService {
    fn name(&self) -> &'static str {
        "products"
    }

    fn status(&self) -> &DomainStatus {
        &self.status
    }

    /// Warm-starts both caches and subscribes to the shared catalogue.
    async fn start(&self) {
        self.products.warm_start().await;
        self.scans.warm_start().await;
        if self.catalogue.is_empty() {
            attach(&self.catalogue, &self.products, &Owner::Anonymous, None).await;
        }
    }

    async fn bind_identity(&self, owner: &Owner) {
        self.subscriptions.cancel_all().await;
        self.scans.evict_foreign(owner).await;
        attach(&self.subscriptions, &self.scans, owner, None).await;
    }

    async fn shutdown(&self) {
        self.subscriptions.cancel_all().await;
        self.catalogue.cancel_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::IdentityGate;
    use crate::local::MemoryLocalStore;
    use crate::remote::{MemoryRemoteStore, OfflineRemoteStore, RemoteStore};
    use serde_json::json;

    fn catalogue() -> Value {
        json!({
            "products": {
                "p1": {"barcode": "111", "name": "Oat Milk", "brand": "Oatly", "sustainabilityScore": 82},
                "p2": {"barcode": "222", "name": "Cow Milk", "sustainabilityScore": 40}
            },
            "alternatives": {
                "p2": {"a1": {"originalProductId": "p2", "alternativeProductId": "p1",
                              "sustainabilityImprovement": 42, "reason": "Plant based"}}
            }
        })
    }

    fn service(remote: Arc<dyn RemoteStore>) -> (ProductsService, IdentityGate, Arc<ManualClock>) {
        let identity = IdentityGate::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = SyncContext::new(Arc::new(MemoryLocalStore::new()), remote, identity.clone())
            .with_clock(clock.clone());
        (ProductsService::new(ctx), identity, clock)
    }

    #[tokio::test]
    async fn test_catalogue_subscription_runs_without_user() {
        let (products, _, _) = service(Arc::new(MemoryRemoteStore::from_tree(catalogue())));
        products.start().await;
        products.products_cache().await_snapshot_after(0).await;
        assert_eq!(products.products().len(), 2);
        products.shutdown().await;
    }

    #[tokio::test]
    async fn test_scan_product_fills_cache() {
        let (products, _, _) = service(Arc::new(MemoryRemoteStore::from_tree(catalogue())));
        let found = products.scan_product("222").await.unwrap();
        assert_eq!(found.id, "p2");
        assert!(!products.is_loading());
        assert!(products.products_cache().find_by_id("p2").is_some());

        assert!(products.scan_product("999").await.is_none());
        assert!(products.error().is_none());
        assert_eq!(products.product_by_id("p1").await.unwrap().name, "Oat Milk");
    }

    #[tokio::test]
    async fn test_alternatives_are_memoised() {
        let remote = Arc::new(MemoryRemoteStore::from_tree(catalogue()));
        let (products, _, _) = service(remote.clone());
        let alternatives = products.alternatives_for("p2").await;
        assert_eq!(alternatives.len(), 1);
        assert_eq!(alternatives[0].alternative_product_id, "p1");

        remote.remove("alternatives/p2").await.unwrap();
        assert_eq!(products.alternatives_for("p2").await.len(), 1);
        assert!(products.alternatives_for("p1").await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_lookup_sets_error() {
        let (products, _, _) = service(Arc::new(OfflineRemoteStore));
        assert!(products.product_by_barcode("111").await.is_none());
        assert_eq!(
            products.error().as_deref(),
            Some("Failed to get product details. Please try again.")
        );
    }

    #[tokio::test]
    async fn test_local_scans_keep_ten_most_recent() {
        let (products, _, clock) = service(Arc::new(OfflineRemoteStore));
        for i in 0..12 {
            assert!(products.add_scan(&format!("p{}", i), None).await);
            clock.advance(1);
        }
        let scans = products.recent_scans();
        assert_eq!(scans.len(), RECENT_SCAN_LIMIT);
        assert_eq!(scans[0].product_id, "p11");
        assert!(scans.iter().all(|s| s.user_id == "anonymous"));

        assert!(products.clear_recent_scans().await);
        assert!(products.recent_scans().is_empty());
    }

    #[tokio::test]
    async fn test_connected_clear_removes_remote_scans() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (products, identity, _) = service(remote.clone());
        identity.sign_in("u1");
        products.bind_identity(&identity.current()).await;
        products.scans_cache().await_snapshot_after(0).await;

        assert!(products.add_scan("p1", None).await);
        assert!(remote.read_once("userScans/u1", None).await.unwrap().is_some());

        assert!(products.clear_recent_scans().await);
        assert!(remote.read_once("userScans/u1", None).await.unwrap().is_none());
        products.shutdown().await;
    }
}
