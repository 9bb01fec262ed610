//! Trained model artifact storage
//!
//! Artifacts are addressed by a content-hash key and stored as one opaque
//! object each under `<project root>/<model directory>/<key>`, serialized
//! with `bincode`.
//!
//! ## Scoped cache
//!
//! [`ModelStorageEngine::cache_models`] opens a scope in which written and
//! loaded artifacts are kept in memory, so repeated loads of the same key
//! within one batch read the backend at most once. The cache is emptied when
//! the scope ends, however it ends. [`ModelStorageEngine::exists`] never
//! looks at the cache.

use crate::storage::{ByteStore, Store};
use crate::{Error, ProjectStorage, Result};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::debug;

/// Content-hash-keyed storage for serialized model artifacts.
///
/// Not synchronized: use one instance per worker.
///
/// # Example
///
/// ```rust
/// use matrix_vault::ProjectStorage;
///
/// # fn main() -> matrix_vault::Result<()> {
/// let project = ProjectStorage::new("memory://models")?;
/// let mut engine = project.model_storage_engine::<Vec<f64>>();
///
/// {
///     let mut cached = engine.cache_models();
///     cached.write(vec![0.25, 0.75], "myhash")?;
///     assert_eq!(*cached.load("myhash")?, vec![0.25, 0.75]); // no backend read
/// }
/// assert!(!engine.is_cached("myhash"));
/// assert!(engine.exists("myhash")?);
/// # Ok(())
/// # }
/// ```
pub struct ModelStorageEngine<T> {
    project_storage: ProjectStorage,
    model_directory: String,
    cache: FxHashMap<String, Arc<T>>,
    should_cache: bool,
}

impl<T> ModelStorageEngine<T> {
    /// Create an engine storing artifacts under `model_directory`.
    #[must_use]
    pub fn new(project_storage: ProjectStorage, model_directory: impl Into<String>) -> Self {
        Self {
            project_storage,
            model_directory: model_directory.into(),
            cache: FxHashMap::default(),
            should_cache: false,
        }
    }

    /// Directory (relative to the project root) holding the artifacts.
    #[must_use]
    pub fn model_directory(&self) -> &str {
        &self.model_directory
    }

    fn get_store(&self, key: &str) -> Result<Store> {
        self.project_storage
            .get_store(&[self.model_directory.as_str(), key])
    }

    /// True if an artifact is durably stored under `key`.
    ///
    /// # Errors
    /// Returns `InvalidLocation` for a key that escapes the model directory,
    /// or error if the backend cannot be reached
    pub fn exists(&self, key: &str) -> Result<bool> {
        self.get_store(key)?.exists()
    }

    /// Remove the artifact under `key` from the backend and the cache.
    ///
    /// # Errors
    /// Returns error if the backend delete fails
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let store = self.get_store(key)?;
        self.cache.remove(key);
        store.delete()
    }

    /// Open a caching scope. The cache is emptied when the returned guard is
    /// dropped, including on early return and panic.
    pub fn cache_models(&mut self) -> ModelCacheGuard<'_, T> {
        self.should_cache = true;
        ModelCacheGuard { engine: self }
    }

    /// True while a caching scope is open.
    #[must_use]
    pub const fn is_caching(&self) -> bool {
        self.should_cache
    }

    /// True if `key` is held in the cache.
    #[must_use]
    pub fn is_cached(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Number of cached artifacts.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn clear_cache(&mut self) {
        if !self.cache.is_empty() {
            debug!(
                model_directory = %self.model_directory,
                artifacts = self.cache.len(),
                "cleared model cache"
            );
        }
        self.cache.clear();
    }
}

impl<T: Serialize + DeserializeOwned> ModelStorageEngine<T> {
    /// Serialize and store `artifact` under `key`, replacing any existing one.
    ///
    /// Inside a caching scope the artifact is also cached.
    ///
    /// # Errors
    /// Returns `InvalidLocation` for a key that escapes the model directory,
    /// `Format` if serialization fails, or the backend write error
    pub fn write(&mut self, artifact: T, key: &str) -> Result<()> {
        let store = self.get_store(key)?;
        let bytes = bincode::serialize(&artifact)
            .map_err(|e| Error::Format(format!("Failed to serialize model {key}: {e}")))?;
        store.write(&bytes)?;
        debug!(key, bytes = bytes.len(), "wrote model");

        if self.should_cache {
            self.cache.insert(key.to_string(), Arc::new(artifact));
        }
        Ok(())
    }

    /// Load the artifact under `key`.
    ///
    /// Inside a caching scope a cached artifact is returned without touching
    /// the backend, and a freshly read one is cached.
    ///
    /// # Errors
    /// Returns `NotFound` if nothing is stored under `key`, or `Format` if the
    /// stored bytes do not deserialize
    pub fn load(&mut self, key: &str) -> Result<Arc<T>> {
        if self.should_cache {
            if let Some(artifact) = self.cache.get(key) {
                debug!(key, "model cache hit");
                return Ok(Arc::clone(artifact));
            }
        }

        let bytes = self.get_store(key)?.load()?;
        let artifact: T = bincode::deserialize(&bytes)
            .map_err(|e| Error::Format(format!("Failed to deserialize model {key}: {e}")))?;
        let artifact = Arc::new(artifact);
        debug!(key, bytes = bytes.len(), "loaded model");

        if self.should_cache {
            self.cache.insert(key.to_string(), Arc::clone(&artifact));
        }
        Ok(artifact)
    }
}

impl<T> fmt::Debug for ModelStorageEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelStorageEngine")
            .field("project_storage", &self.project_storage)
            .field("model_directory", &self.model_directory)
            .field("cached", &self.cache.len())
            .field("should_cache", &self.should_cache)
            .finish()
    }
}

/// Caching scope for a [`ModelStorageEngine`]; empties the cache on drop.
#[must_use = "the cache is cleared as soon as the guard is dropped"]
pub struct ModelCacheGuard<'a, T> {
    engine: &'a mut ModelStorageEngine<T>,
}

impl<T> Deref for ModelCacheGuard<'_, T> {
    type Target = ModelStorageEngine<T>;

    fn deref(&self) -> &ModelStorageEngine<T> {
        self.engine
    }
}

impl<T> DerefMut for ModelCacheGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut ModelStorageEngine<T> {
        self.engine
    }
}

impl<T> Drop for ModelCacheGuard<'_, T> {
    fn drop(&mut self) {
        self.engine.clear_cache();
        self.engine.should_cache = false;
    }
}
