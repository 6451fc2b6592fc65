use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String)
}

/// Synchronous string key-value persistence.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, String>>
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key under `directory`.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf
}

impl FileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into()
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.directory.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source })
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.directory).map_err(|source| StoreError::Io {
            path: self.directory.clone(),
            source
        })?;

        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, value).map_err(|source| StoreError::Io {
            path: staging.clone(),
            source
        })?;
        std::fs::rename(&staging, &path).map_err(|source| StoreError::Io { path, source })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v1").unwrap();
        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_file_store_creates_directory() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("nested").join("dir"));

        store.set("semantic-query-history", "[]").unwrap();

        let written = std::fs::read_to_string(
            temp.path()
                .join("nested/dir/semantic-query-history.json")
        )
        .unwrap();
        assert_eq!(written, "[]");
        assert_eq!(store.get("semantic-query-history").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_file_store_missing_key_and_remove() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());

        assert_eq!(store.get("absent").unwrap(), None);
        store.remove("absent").unwrap();

        store.set("present", "x").unwrap();
        store.remove("present").unwrap();
        assert_eq!(store.get("present").unwrap(), None);
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());

        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(store.set(key, "x"), Err(StoreError::InvalidKey(_))), "{key}");
        }
    }
}
