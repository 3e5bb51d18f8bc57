//! # Index Storage
//!
//! Key-value persistence for the embedding index. A [`Store`] scopes keys to
//! one collection on top of a [`StorageBackend`]; [`FileStorage`] writes one
//! JSON file per key, [`MemoryStorage`] keeps everything in a map for tests.

use crate::error::{self, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Storage backend trait
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()>;
    fn delete(&mut self, key: &str) -> Result<()>;
    fn exists(&self, key: &str) -> bool;
    fn keys(&self) -> Vec<String>;
    /// Human-readable location for logs and errors
    fn location(&self) -> String;
    /// Number of successful `set`/`delete` calls since creation
    fn writes(&self) -> usize;
}

/// In-memory storage
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: HashMap<String, serde_json::Value>,
    writes: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.data.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        self.data.insert(key.to_string(), value);
        self.writes += 1;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        if self.data.remove(key).is_some() {
            self.writes += 1;
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    fn location(&self) -> String {
        "memory".to_string()
    }

    fn writes(&self) -> usize {
        self.writes
    }
}

/// File-based storage, one pretty-printed JSON file per key
pub struct FileStorage {
    base_path: PathBuf,
    writes: usize,
}

impl FileStorage {
    /// Open a directory without creating it.
    pub fn open(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            writes: 0,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.base_path.join(format!("{}.json", safe_key))
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_path).map_err(|e| {
            Error::from(e)
                .with_operation("storage::create_dir")
                .with_context("path", self.base_path.display().to_string())
        })
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.key_to_path(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::from(e)
                    .with_operation("storage::get")
                    .with_context("path", path.display().to_string()))
            }
        };
        serde_json::from_str(&content).map(Some).map_err(|e| {
            error::serialization_error(format!("corrupt entry {}: {}", path.display(), e))
                .with_operation("storage::get")
                .set_source(e)
        })
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        self.ensure_dir()?;
        let path = self.key_to_path(key);
        let content = serde_json::to_string_pretty(&value)
            .map_err(|e| error::serialization_error(e.to_string()))?;
        std::fs::write(&path, content)
            .map_err(|e| error::io_error(format!("Failed to write {}: {}", path.display(), e)))?;
        self.writes += 1;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let path = self.key_to_path(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| error::io_error(format!("Failed to delete {}: {}", path.display(), e)))?;
            self.writes += 1;
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.key_to_path(key).exists()
    }

    fn keys(&self) -> Vec<String> {
        std::fs::read_dir(&self.base_path)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let path = e.path();
                        if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                            path.file_stem()
                                .and_then(|s| s.to_str())
                                .map(|s| s.to_string())
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn location(&self) -> String {
        self.base_path.display().to_string()
    }

    fn writes(&self) -> usize {
        self.writes
    }
}

/// Typed, collection-scoped view over a backend
pub struct Store {
    backend: Box<dyn StorageBackend>,
    collection: String,
}

impl Store {
    pub fn memory(collection: impl Into<String>) -> Self {
        Self::with_backend(MemoryStorage::new(), collection)
    }

    pub fn file(path: impl AsRef<Path>, collection: impl Into<String>) -> Self {
        Self::with_backend(FileStorage::open(path), collection)
    }

    pub fn with_backend(backend: impl StorageBackend + 'static, collection: impl Into<String>) -> Self {
        Self {
            backend: Box::new(backend),
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn location(&self) -> String {
        format!("{}/{}", self.backend.location(), self.collection)
    }

    pub fn writes(&self) -> usize {
        self.backend.writes()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}.{}", self.collection, key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.backend.exists(&self.full_key(key))
    }

    pub fn get_typed<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get(&self.full_key(key))? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                error::serialization_error(format!("unexpected shape for '{}': {}", key, e))
                    .with_operation("storage::get_typed")
                    .with_context("collection", self.collection.clone())
            }),
        }
    }

    pub fn set_typed<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_value(value)
            .map_err(|e| error::serialization_error(e.to_string()))?;
        let key = self.full_key(key);
        self.backend.set(&key, json)
    }

    /// Remove every key in this collection.
    pub fn clear(&mut self) -> Result<()> {
        let prefix = format!("{}.", self.collection);
        for key in self.backend.keys() {
            if key.starts_with(&prefix) {
                self.backend.delete(&key)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llrefine_error::ErrorKind;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        id: String,
        vector: Vec<f32>,
    }

    #[test]
    fn test_memory_store_roundtrip_counts_writes() {
        let mut store = Store::memory("reviews");
        assert!(!store.exists("manifest"));
        assert_eq!(store.get_typed::<Entry>("manifest").unwrap(), None);

        let entry = Entry { id: "0".into(), vector: vec![1.0, 0.0] };
        store.set_typed("entries", &entry).unwrap();
        assert!(store.exists("entries"));
        assert_eq!(store.get_typed::<Entry>("entries").unwrap(), Some(entry));
        assert_eq!(store.writes(), 1);
        assert_eq!(store.location(), "memory/reviews");
    }

    #[test]
    fn test_clear_is_scoped_to_collection() {
        let mut backend = MemoryStorage::new();
        backend.set("other.manifest", serde_json::json!(1)).unwrap();
        let mut store = Store::with_backend(backend, "reviews");
        store.set_typed("manifest", &2).unwrap();
        store.clear().unwrap();
        assert!(!store.exists("manifest"));
        assert_eq!(store.backend.keys(), vec!["other.manifest".to_string()]);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector_db");

        let mut store = Store::file(&path, "reviews");
        // Nothing is created until the first write
        assert!(!path.exists());
        store.set_typed("manifest", &vec!["a", "b"]).unwrap();
        assert!(path.join("reviews.manifest.json").exists());

        let reopened = Store::file(&path, "reviews");
        let loaded: Option<Vec<String>> = reopened.get_typed("manifest").unwrap();
        assert_eq!(loaded, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(reopened.writes(), 0);
    }

    #[test]
    fn test_corrupt_file_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("reviews.manifest.json"), "{not json").unwrap();
        let store = Store::file(dir.path(), "reviews");
        let err = store.get_typed::<Vec<String>>("manifest").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationFailed);
    }
}
