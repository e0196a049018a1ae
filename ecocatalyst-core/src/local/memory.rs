//! In-process local store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::LocalStore;
use crate::error::StorageError;

/// Local store kept in a map. Useful for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Raw blob stored under `key`, bypassing failure injection.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Backend("local store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, blob: &str) -> Result<(), StorageError> {
        self.check()?;
        self.lock().insert(key.to_string(), blob.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryLocalStore::new();
        store.set("k", "[1]").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("[1]"));
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        // Removing twice is fine
        store.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryLocalStore::new();
        store.set("k", "[]").await.unwrap();
        store.set_failing(true);
        assert!(store.get("k").await.is_err());
        assert!(store.set("k", "[2]").await.is_err());
        assert_eq!(store.peek("k").as_deref(), Some("[]"));
        store.set_failing(false);
        assert!(store.contains("k"));
    }
}
