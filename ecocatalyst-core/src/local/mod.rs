//! Local persistent cache.
//!
//! A flat, string-keyed blob store with one key per domain collection. It is
//! a best-effort warm-start cache: callers log failures and carry on with the
//! in-memory state.

mod file;
mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

pub use file::FileLocalStore;
pub use memory::MemoryLocalStore;

#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Returns `Ok(None)` when nothing is stored under the key.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replaces the blob stored under the key.
    async fn set(&self, key: &str, blob: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Static storage keys, one per domain collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    RecentScans,
    CachedProducts,
    FootprintEntries,
    CurrentDietPlan,
    MealEntries,
    DietChatHistory,
    Achievements,
    UserAchievements,
    UserStats,
}

impl Namespace {
    pub const ALL: [Namespace; 9] = [
        Namespace::RecentScans,
        Namespace::CachedProducts,
        Namespace::FootprintEntries,
        Namespace::CurrentDietPlan,
        Namespace::MealEntries,
        Namespace::DietChatHistory,
        Namespace::Achievements,
        Namespace::UserAchievements,
        Namespace::UserStats,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Namespace::RecentScans => "ecocatalyst_recent_scans",
            Namespace::CachedProducts => "ecocatalyst_cached_products",
            Namespace::FootprintEntries => "ecocatalyst_footprint_entries",
            Namespace::CurrentDietPlan => "ecocatalyst_current_diet_plan",
            Namespace::MealEntries => "ecocatalyst_meal_entries",
            Namespace::DietChatHistory => "ecocatalyst_diet_chat_history",
            Namespace::Achievements => "ecocatalyst_achievements",
            Namespace::UserAchievements => "ecocatalyst_user_achievements",
            Namespace::UserStats => "ecocatalyst_user_stats",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Reads a JSON-encoded collection.
pub async fn load_collection<T: DeserializeOwned>(
    store: &dyn LocalStore,
    namespace: Namespace,
) -> Result<Option<Vec<T>>, StorageError> {
    match store.get(namespace.key()).await? {
        Some(blob) => serde_json::from_str(&blob)
            .map(Some)
            .map_err(|e| StorageError::Decode(format!("{}: {}", namespace, e))),
        None => Ok(None),
    }
}

/// Replaces the stored collection with `items`.
pub async fn save_collection<T: Serialize>(
    store: &dyn LocalStore,
    namespace: Namespace,
    items: &[T],
) -> Result<(), StorageError> {
    let blob = serde_json::to_string(items)
        .map_err(|e| StorageError::Encode(format!("{}: {}", namespace, e)))?;
    store.set(namespace.key(), &blob).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_namespace_keys_are_unique() {
        let keys: HashSet<_> = Namespace::ALL.iter().map(|n| n.key()).collect();
        assert_eq!(keys.len(), Namespace::ALL.len());
        for key in keys {
            assert!(key.starts_with("ecocatalyst_"));
        }
    }

    #[tokio::test]
    async fn test_collection_round_trip() {
        let store = MemoryLocalStore::new();
        let empty: Option<Vec<String>> = load_collection(&store, Namespace::MealEntries)
            .await
            .unwrap();
        assert!(empty.is_none());

        save_collection(&store, Namespace::MealEntries, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let loaded: Vec<String> = load_collection(&store, Namespace::MealEntries)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_decode_error() {
        let store = MemoryLocalStore::new();
        store
            .set(Namespace::UserStats.key(), "{not json")
            .await
            .unwrap();
        let result: Result<Option<Vec<String>>, _> =
            load_collection(&store, Namespace::UserStats).await;
        assert!(matches!(result, Err(StorageError::Decode(_))));
    }
}
