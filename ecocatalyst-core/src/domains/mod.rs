//! Domain services.
//!
//! Each service owns the caches of one domain and is the API boundary for
//! callers: operations never return errors. Failures are logged, recorded as
//! a user-facing message in the domain's [`DomainStatus`], and the operation
//! returns `false`, `None` or an empty collection.

mod diet;
mod footprint;
mod gamification;
mod products;

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{Entity, EntityCache};
use crate::error::{RemoteError, SyncResult};
use crate::identity::Owner;
use crate::reconcile::{subscribe_cache, SnapshotHook, SubscriptionSet};
use crate::status::{DomainStatus, DB_CONNECTION_ERROR};

pub use diet::DietService;
pub use footprint::FootprintService;
pub use gamification::GamificationService;
pub use products::ProductsService;

#[async_trait]
pub trait Domain: Send + Sync {
    fn name(&self) -> &'static str;

    fn status(&self) -> &DomainStatus;

    /// Seeds every cache from the local store.
    async fn start(&self);

    /// Tears down subscriptions of the previous identity, drops its entities
    /// and subscribes for `owner`.
    async fn bind_identity(&self, owner: &Owner);

    async fn shutdown(&self);

    fn error(&self) -> Option<String> {
        self.status().error()
    }

    fn clear_error(&self) {
        self.status().clear_error()
    }

    fn is_loading(&self) -> bool {
        self.status().is_loading()
    }
}

/// Subscribes `cache` for `owner` and keeps the handle in `set`.
///
/// A missing backend is expected in local-only sessions and only logged.
pub(crate) async fn attach<T: Entity>(
    set: &SubscriptionSet,
    cache: &Arc<EntityCache<T>>,
    owner: &Owner,
    hook: Option<SnapshotHook>,
) {
    match subscribe_cache(cache, owner, hook).await {
        Ok(Some(handle)) => set.add(handle),
        Ok(None) => {}
        Err(RemoteError::Unavailable) => {
            tracing::debug!(kind = T::KIND, "Remote store unavailable, staying local");
        }
        Err(e) => cache.status().fail(DB_CONNECTION_ERROR, &e),
    }
}

/// Converts an operation result into the boundary convention.
pub(crate) fn report<T>(status: &DomainStatus, message: &str, result: SyncResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            status.fail(message, &e);
            None
        }
    }
}
