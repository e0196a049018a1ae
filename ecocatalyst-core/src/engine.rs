//! Wires the four domain services to one context and keeps them bound to
//! the current identity.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;

use crate::completion::TextCompletion;
use crate::context::SyncContext;
use crate::domains::{DietService, Domain, FootprintService, GamificationService, ProductsService};
use crate::identity::Owner;

pub struct SyncEngine {
    ctx: SyncContext,
    footprint: Arc<FootprintService>,
    products: Arc<ProductsService>,
    diet: Arc<DietService>,
    gamification: Arc<GamificationService>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(ctx: SyncContext, completion: Arc<dyn TextCompletion>) -> Self {
        Self {
            footprint: Arc::new(FootprintService::new(ctx.clone())),
            products: Arc::new(ProductsService::new(ctx.clone())),
            diet: Arc::new(DietService::new(ctx.clone(), completion)),
            gamification: Arc::new(GamificationService::new(ctx.clone())),
            ctx,
            watcher: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn footprint(&self) -> &Arc<FootprintService> {
        &self.footprint
    }

    pub fn products(&self) -> &Arc<ProductsService> {
        &self.products
    }

    pub fn diet(&self) -> &Arc<DietService> {
        &self.diet
    }

    pub fn gamification(&self) -> &Arc<GamificationService> {
        &self.gamification
    }

    pub fn domains(&self) -> Vec<Arc<dyn Domain>> {
        vec![
            self.footprint.clone() as Arc<dyn Domain>,
            self.products.clone(),
            self.diet.clone(),
            self.gamification.clone(),
        ]
    }

    /// Warm-starts every domain, binds the current identity and spawns the
    /// watcher that rebinds all domains whenever the identity changes.
    pub async fn start(&self) {
        let domains = self.domains();
        for domain in &domains {
            domain.start().await;
        }

        let mut identity = self.ctx.identity.subscribe();
        let owner = identity.borrow_and_update().clone();
        bind_all(&domains, &owner).await;

        let task = tokio::spawn(async move {
            while identity.changed().await.is_ok() {
                let owner = identity.borrow_and_update().clone();
                tracing::info!(owner = %owner, "Identity changed, rebinding domains");
                bind_all(&domains, &owner).await;
            }
        });
        if let Some(previous) = self.lock_watcher().replace(task) {
            previous.abort();
        }
    }

    /// Stops the identity watcher and tears down every subscription.
    pub async fn shutdown(&self) {
        let watcher = self.lock_watcher().take();
        if let Some(watcher) = watcher {
            watcher.abort();
            let _ = watcher.await;
        }
        for domain in self.domains() {
            domain.shutdown().await;
        }
    }

    /// Current error of every domain that has one.
    pub fn errors(&self) -> Vec<(&'static str, String)> {
        self.domains()
            .iter()
            .filter_map(|domain| domain.error().map(|error| (domain.name(), error)))
            .collect()
    }

    fn lock_watcher(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watcher.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn bind_all(domains: &[Arc<dyn Domain>], owner: &Owner) {
    for domain in domains {
        domain.bind_identity(owner).await;
    }
    tracing::debug!(owner = %owner, "Domains bound");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::completion::NoCompletion;
    use crate::identity::IdentityGate;
    use crate::local::MemoryLocalStore;
    use crate::models::{FootprintCategory, NewFootprintEntry};
    use crate::remote::{MemoryRemoteStore, OfflineRemoteStore, RemoteStore};
    use chrono::NaiveDate;
    use serde_json::json;

    // 2024-03-15T10:00:00Z
    const T: i64 = 1_710_496_800_000;

    fn engine(remote: Arc<dyn RemoteStore>) -> (SyncEngine, IdentityGate) {
        let identity = IdentityGate::new();
        let ctx = SyncContext::new(Arc::new(MemoryLocalStore::new()), remote, identity.clone())
            .with_clock(Arc::new(ManualClock::new(T)));
        (SyncEngine::new(ctx, Arc::new(NoCompletion)), identity)
    }

    fn entry(amount: f64) -> NewFootprintEntry {
        NewFootprintEntry::new(
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            FootprintCategory::Food,
            "meal",
            amount,
        )
    }

    #[tokio::test]
    async fn test_local_only_engine() {
        let (engine, _) = engine(Arc::new(OfflineRemoteStore));
        engine.start().await;
        assert!(engine.footprint().add_entry(entry(2.3)).await.is_some());
        assert_eq!(engine.footprint().summary().daily, 2.3);
        assert!(engine.errors().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_sign_in_replaces_anonymous_data() {
        let remote = Arc::new(MemoryRemoteStore::from_tree(json!({
            "footprints": {"u1": {
                "k1": {"userId": "u1", "date": "2024-03-15", "timestamp": T,
                       "category": "food", "activityType": "lunch", "carbonAmount": 4.0}
            }}
        })));
        let (engine, identity) = engine(remote);
        engine.start().await;
        engine.footprint().add_entry(entry(1.0)).await.unwrap();

        let seen = engine.footprint().cache().snapshot_count();
        identity.sign_in("u1");
        engine.footprint().cache().await_snapshot_after(seen).await;

        let entries = engine.footprint().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_id, "u1");
        assert_eq!(engine.footprint().summary().daily, 4.0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_sign_out_drops_user_data() {
        let remote = Arc::new(MemoryRemoteStore::from_tree(json!({
            "footprints": {"u1": {
                "k1": {"userId": "u1", "date": "2024-03-15", "timestamp": T,
                       "category": "food", "activityType": "lunch", "carbonAmount": 4.0}
            }}
        })));
        let (engine, identity) = engine(remote.clone());
        identity.sign_in("u1");
        engine.start().await;
        engine.footprint().cache().await_snapshot_after(0).await;
        assert_eq!(engine.footprint().entries().len(), 1);

        let mut view = engine.footprint().cache().watch();
        identity.sign_out();
        view.wait_for(|entries| entries.is_empty()).await.unwrap();
        assert_eq!(engine.footprint().summary().daily, 0.0);

        engine.shutdown().await;
        assert_eq!(remote.subscriber_count(), 0);
    }
}
