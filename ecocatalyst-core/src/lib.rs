//! EcoCatalyst Core Library
//!
//! Local-first entity caches kept in sync with a real-time remote store,
//! plus the footprint, products, diet and gamification domains built on them.

pub mod cache;
pub mod clock;
pub mod completion;
pub mod context;
pub mod domains;
pub mod engine;
pub mod error;
pub mod identity;
pub mod local;
pub mod models;
pub mod reconcile;
pub mod remote;
pub mod status;

pub use cache::{CollectionSpec, Entity, EntityCache, Patch, RemotePath, Shape};
pub use clock::{Calendar, Clock, ManualClock, SystemClock};
pub use completion::{MealSuggestion, NoCompletion, TextCompletion};
pub use context::SyncContext;
pub use domains::{DietService, Domain, FootprintService, GamificationService, ProductsService};
pub use engine::SyncEngine;
pub use error::{GenerationError, RemoteError, StorageError, SyncError, SyncResult};
pub use identity::{IdentityGate, Owner, User};
pub use local::{FileLocalStore, LocalStore, MemoryLocalStore, Namespace};
pub use remote::{
    check_server, MemoryRemoteStore, OfflineRemoteStore, Query, RemoteStore, Snapshot,
    WsRemoteStore,
};
pub use status::DomainStatus;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
