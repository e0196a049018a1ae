use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::watch;

use super::{attach, report, Domain};
use crate::cache::{unbounded_query, CollectionSpec, EntityCache, RemotePath, Shape};
use crate::context::SyncContext;
use crate::identity::Owner;
use crate::local::Namespace;
use crate::models::{
    FootprintCategory, FootprintEntry, FootprintPatch, FootprintSummary, NewFootprintEntry,
};
use crate::reconcile::{summarize_footprint, SubscriptionSet};
use crate::status::DomainStatus;

fn newest_first(a: &FootprintEntry, b: &FootprintEntry) -> Ordering {
    b.timestamp.cmp(&a.timestamp)
}

pub const ENTRIES: CollectionSpec<FootprintEntry> = CollectionSpec {
    namespace: Namespace::FootprintEntries,
    remote: RemotePath::PerOwner("footprints"),
    shape: Shape::Collection,
    order: newest_first,
    query: unbounded_query,
    local_capacity: None,
};

/// Carbon footprint entries and their summary.
pub struct FootprintService {
    ctx: SyncContext,
    status: Arc<DomainStatus>,
    entries: Arc<EntityCache<FootprintEntry>>,
    summary: Arc<watch::Sender<FootprintSummary>>,
    subscriptions: SubscriptionSet,
}

impl FootprintService {
    pub fn new(ctx: SyncContext) -> Self {
        let status = Arc::new(DomainStatus::new("footprint"));
        let entries = EntityCache::new(ENTRIES, ctx.clone(), status.clone());
        let (summary, _) = watch::channel(FootprintSummary::default());
        let summary = Arc::new(summary);

        // The summary is recomputed from scratch on every collection change.
        let tx = summary.clone();
        let clock = ctx.clock.clone();
        let calendar = ctx.calendar;
        entries.on_change(move |list| {
            tx.send_replace(summarize_footprint(list, clock.now_ms(), &calendar));
        });

        Self {
            ctx,
            status,
            entries,
            summary,
            subscriptions: SubscriptionSet::new(),
        }
    }

    pub fn cache(&self) -> &Arc<EntityCache<FootprintEntry>> {
        &self.entries
    }

    pub fn entries(&self) -> Arc<Vec<FootprintEntry>> {
        self.entries.items()
    }

    /// Summary of the current collection, as of the last change.
    pub fn summary(&self) -> FootprintSummary {
        self.summary.borrow().clone()
    }

    pub fn watch_summary(&self) -> watch::Receiver<FootprintSummary> {
        self.summary.subscribe()
    }

    /// Recomputes the summary against the current time.
    pub fn calculate_summary(&self) -> FootprintSummary {
        summarize_footprint(&self.entries.items(), self.ctx.now(), &self.ctx.calendar)
    }

    pub async fn add_entry(&self, entry: NewFootprintEntry) -> Option<String> {
        let result = self
            .entries
            .create(|stamp| entry.into_entry(stamp.owner_id, stamp.now))
            .await
            .map(|created| created.id);
        report(
            &self.status,
            "Failed to save footprint entry. Please try again.",
            result,
        )
    }

    pub async fn update_entry(&self, id: &str, patch: FootprintPatch) -> bool {
        let result = self.entries.update(id, patch).await;
        report(
            &self.status,
            "Failed to update footprint entry. Please try again.",
            result,
        )
        .is_some()
    }

    pub async fn delete_entry(&self, id: &str) -> bool {
        let result = self.entries.delete(id).await;
        report(
            &self.status,
            "Failed to delete footprint entry. Please try again.",
            result,
        )
        .is_some()
    }

    /// Entries whose timestamp falls within `start` through the end of `end`.
    pub fn entries_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<FootprintEntry> {
        let from = self.ctx.calendar.start_of_day(start);
        let to = self.ctx.calendar.end_of_day(end);
        self.entries
            .filter(|entry| entry.timestamp >= from && entry.timestamp <= to)
    }

    pub fn entries_by_category(&self, category: FootprintCategory) -> Vec<FootprintEntry> {
        self.entries.filter(|entry| entry.category == category)
    }
}

#[async_trait]
impl Domain for FootprintService {
    fn name(&self) -> &'static str {
        "footprint"
    }

    fn status(&self) -> &DomainStatus {
        &self.status
    }

    async fn start(&self) {
        self.entries.warm_start().await;
    }

    async fn bind_identity(&self, owner: &Owner) {
        self.subscriptions.cancel_all().await;
        self.entries.evict_foreign(owner).await;
        attach(&self.subscriptions, &self.entries, owner, None).await;
    }

    async fn shutdown(&self) {
        self.subscriptions.cancel_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::IdentityGate;
    use crate::local::MemoryLocalStore;
    use crate::remote::{MemoryRemoteStore, RemoteStore};
    use serde_json::json;

    // 2024-03-15T10:00:00Z
    const T: i64 = 1_710_496_800_000;

    fn service(remote: Arc<MemoryRemoteStore>) -> (FootprintService, IdentityGate) {
        let identity = IdentityGate::new();
        let ctx = SyncContext::new(Arc::new(MemoryLocalStore::new()), remote, identity.clone())
            .with_clock(Arc::new(ManualClock::new(T)));
        (FootprintService::new(ctx), identity)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[tokio::test]
    async fn test_anonymous_food_entry_updates_summary() {
        let (footprint, _) = service(Arc::new(MemoryRemoteStore::new()));
        let id = footprint
            .add_entry(NewFootprintEntry::new(
                today(),
                FootprintCategory::Food,
                "lunch",
                2.3,
            ))
            .await
            .unwrap();

        assert_eq!(footprint.entries().len(), 1);
        assert_eq!(id, format!("local_{}", T));
        let entry = footprint.cache().find_by_id(&id).unwrap();
        assert_eq!(entry.user_id, "anonymous");
        assert_eq!(entry.timestamp, T);

        let summary = footprint.summary();
        assert_eq!(summary.daily, 2.3);
        assert_eq!(summary.category(FootprintCategory::Food), 2.3);
        assert_eq!(footprint.calculate_summary(), summary);
    }

    #[tokio::test]
    async fn test_remote_failure_leaves_entries_untouched() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (footprint, identity) = service(remote.clone());
        identity.sign_in("u1");
        let id = footprint
            .add_entry(NewFootprintEntry::new(today(), FootprintCategory::Food, "lunch", 2.0))
            .await
            .unwrap();
        assert_eq!(footprint.summary().daily, 2.0);

        remote.set_offline(true);
        let added = footprint
            .add_entry(NewFootprintEntry::new(today(), FootprintCategory::Food, "dinner", 3.0))
            .await;
        assert!(added.is_none());
        assert_eq!(
            footprint.error().as_deref(),
            Some("Failed to save footprint entry. Please try again.")
        );

        let patch = FootprintPatch {
            carbon_amount: Some(9.0),
            ..Default::default()
        };
        assert!(!footprint.update_entry(&id, patch).await);
        assert!(!footprint.delete_entry(&id).await);
        assert_eq!(
            footprint.error().as_deref(),
            Some("Failed to delete footprint entry. Please try again.")
        );

        let entries = footprint.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].carbon_amount, 2.0);
        assert_eq!(footprint.summary().daily, 2.0);
    }

    #[tokio::test]
    async fn test_connected_entry_is_owned_by_user() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (footprint, identity) = service(remote.clone());
        identity.sign_in("u1");
        footprint.bind_identity(&identity.current()).await;
        footprint.cache().await_snapshot_after(0).await;

        let seen = footprint.cache().snapshot_count();
        let id = footprint
            .add_entry(NewFootprintEntry::new(
                today(),
                FootprintCategory::Transportation,
                "bus",
                1.1,
            ))
            .await
            .unwrap();
        footprint.cache().await_snapshot_after(seen).await;

        let entry = footprint.cache().find_by_id(&id).unwrap();
        assert_eq!(entry.user_id, "u1");
        let stored = remote
            .read_once(&format!("footprints/u1/{}", id), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["userId"], "u1");
        footprint.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_snapshot_resets_entries_and_summary() {
        let remote = Arc::new(MemoryRemoteStore::from_tree(json!({
            "footprints": {"u1": {
                "k1": {"userId": "u1", "date": "2024-03-15", "timestamp": T,
                       "category": "housing", "activityType": "heating", "carbonAmount": 5.0}
            }}
        })));
        let (footprint, identity) = service(remote.clone());
        identity.sign_in("u1");
        footprint.bind_identity(&identity.current()).await;
        footprint.cache().await_snapshot_after(0).await;
        assert_eq!(footprint.entries().len(), 1);
        assert_eq!(footprint.summary().daily, 5.0);

        let seen = footprint.cache().snapshot_count();
        remote.remove("footprints/u1").await.unwrap();
        footprint.cache().await_snapshot_after(seen).await;

        assert!(footprint.entries().is_empty());
        assert_eq!(footprint.summary(), FootprintSummary::default());
        footprint.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_missing_entry_sets_error() {
        let (footprint, _) = service(Arc::new(MemoryRemoteStore::new()));
        assert!(!footprint.update_entry("nope", FootprintPatch::default()).await);
        assert_eq!(
            footprint.error().as_deref(),
            Some("Failed to update footprint entry. Please try again.")
        );

        // Errors stay until cleared, even after a successful operation
        footprint
            .add_entry(NewFootprintEntry::new(today(), FootprintCategory::Other, "x", 1.0))
            .await
            .unwrap();
        assert!(footprint.error().is_some());
        footprint.clear_error();
        assert!(footprint.error().is_none());
    }

    #[tokio::test]
    async fn test_range_and_category_filters() {
        let (footprint, _) = service(Arc::new(MemoryRemoteStore::new()));
        footprint
            .add_entry(NewFootprintEntry::new(today(), FootprintCategory::Food, "a", 1.0))
            .await
            .unwrap();
        let id = footprint
            .add_entry(NewFootprintEntry::new(today(), FootprintCategory::Products, "b", 2.0))
            .await
            .unwrap();
        assert!(footprint
            .update_entry(
                &id,
                FootprintPatch {
                    carbon_amount: Some(3.0),
                    ..Default::default()
                }
            )
            .await);

        assert_eq!(footprint.entries_in_range(today(), today()).len(), 2);
        let yesterday = today().pred_opt().unwrap();
        assert!(footprint.entries_in_range(yesterday, yesterday).is_empty());
        let products = footprint.entries_by_category(FootprintCategory::Products);
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].carbon_amount, 3.0);
        assert_eq!(footprint.summary().daily, 4.0);

        assert!(footprint.delete_entry(&id).await);
        assert_eq!(footprint.summary().daily, 1.0);
    }
}
