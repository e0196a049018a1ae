//! File-backed local store.
//!
//! Each key is stored as `<key>.json` in the data directory:
//!
//! ```text
//! ~/.local/share/ecocatalyst/cache/
//! ├── ecocatalyst_footprint_entries.json
//! ├── ecocatalyst_meal_entries.json
//! └── ecocatalyst_user_stats.json
//! ```

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use super::LocalStore;
use crate::error::StorageError;

/// File extension for stored blobs.
const BLOB_EXTENSION: &str = "json";

#[derive(Clone, Debug)]
pub struct FileLocalStore {
    data_dir: PathBuf,
}

impl FileLocalStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Returns the full path for a key.
    pub fn blob_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.data_dir.join(format!("{}.{}", key, BLOB_EXTENSION)))
    }
}

/// Keys become file names, so only a conservative character set is allowed.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.blob_path(key)?;
        match fs::read_to_string(&path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(path, e)),
        }
    }

    async fn set(&self, key: &str, blob: &str) -> Result<(), StorageError> {
        let path = self.blob_path(key)?;
        fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| StorageError::Io(self.data_dir.clone(), e))?;

        // Write then rename so a crash never leaves a truncated blob
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, blob)
            .await
            .map_err(|e| StorageError::Io(tmp.clone(), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::Io(path, e))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileLocalStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLocalStore::new(temp_dir.path().join("cache"));
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (_dir, store) = setup();
        assert!(store.get("ecocatalyst_meal_entries").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_creates_directory() {
        let (_dir, store) = setup();
        assert!(!store.data_dir().exists());

        store.set("ecocatalyst_user_stats", "[]").await.unwrap();
        assert!(store.data_dir().exists());
        assert!(store
            .blob_path("ecocatalyst_user_stats")
            .unwrap()
            .exists());
        assert_eq!(
            store.get("ecocatalyst_user_stats").await.unwrap().as_deref(),
            Some("[]")
        );
    }

    #[tokio::test]
    async fn test_set_overwrites_and_remove() {
        let (_dir, store) = setup();
        store.set("k", "[1]").await.unwrap();
        store.set("k", "[1,2]").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("[1,2]"));

        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        store.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let (_dir, store) = setup();
        for key in ["", "../escape", "a/b", "a.b"] {
            assert!(matches!(
                store.set(key, "[]").await,
                Err(StorageError::InvalidKey(_))
            ));
        }
    }
}
