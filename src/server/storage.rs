//! Durable copy of the server's data tree.
//!
//! The whole tree lives in one JSON file:
//! ```text
//! <DATA_DIR>/
//!   tree.json
//! ```
//!
//! It is rewritten after every mutation and read once at startup.

use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const TREE_FILENAME: &str = "tree.json";

/// Errors that can occur while loading or saving the tree.
#[derive(Debug)]
pub enum ServerStorageError {
    /// I/O error reading or writing a file.
    IoError(PathBuf, io::Error),
    /// The file exists but does not hold a JSON tree.
    ParseError(PathBuf, serde_json::Error),
}

impl std::fmt::Display for ServerStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            ServerStorageError::ParseError(path, e) => {
                write!(f, "Failed to parse tree {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ServerStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerStorageError::IoError(_, e) => Some(e),
            ServerStorageError::ParseError(_, e) => Some(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeStorage {
    data_dir: PathBuf,
}

impl TreeStorage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tree_path(&self) -> PathBuf {
        self.data_dir.join(TREE_FILENAME)
    }

    /// Returns `Ok(None)` if nothing has been saved yet.
    pub fn load(&self) -> Result<Option<Value>, ServerStorageError> {
        let path = self.tree_path();
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ServerStorageError::ParseError(path, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServerStorageError::IoError(path, e)),
        }
    }

    /// Replaces the stored tree.
    pub fn save(&self, tree: &Value) -> Result<(), ServerStorageError> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| ServerStorageError::IoError(self.data_dir.clone(), e))?;

        let path = self.tree_path();
        let bytes = serde_json::to_vec(tree)
            .map_err(|e| ServerStorageError::ParseError(path.clone(), e))?;

        // Write atomically using temp file + rename
        let temp_path = path.with_extension("json.tmp");
        let mut file = File::create(&temp_path)
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;
        file.write_all(&bytes)
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;
        file.sync_all()
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;

        fs::rename(&temp_path, &path).map_err(|e| ServerStorageError::IoError(path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let storage = TreeStorage::new(temp_dir.path());
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = TreeStorage::new(temp_dir.path().join("server"));
        let tree = json!({"footprints": {"u1": {"k1": {"carbonAmount": 2.5}}}});

        storage.save(&tree).unwrap();
        assert_eq!(storage.load().unwrap(), Some(tree));
        assert!(!storage.tree_path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_save_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let storage = TreeStorage::new(temp_dir.path());

        storage.save(&json!({"a": 1})).unwrap();
        storage.save(&json!({"b": 2})).unwrap();
        assert_eq!(storage.load().unwrap(), Some(json!({"b": 2})));
    }

    #[test]
    fn test_corrupt_tree_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let storage = TreeStorage::new(temp_dir.path());
        fs::write(storage.tree_path(), "{not json").unwrap();

        assert!(matches!(
            storage.load(),
            Err(ServerStorageError::ParseError(_, _))
        ));
    }
}
