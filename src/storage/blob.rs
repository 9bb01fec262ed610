//! Object-storage-backed byte store.
//!
//! Wraps an `object_store` client (S3, in-memory). The client is async; a
//! shared runtime blocks on each call so the store keeps the synchronous
//! [`ByteStore`] contract.

use super::ByteStore;
use crate::{Error, Result};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;

/// Byte store for a single key in an object store bucket.
///
/// Must not be called from within a tokio runtime.
#[derive(Clone)]
pub struct BlobStore {
    inner: Arc<dyn ObjectStore>,
    key: Path,
    url: String,
    runtime: Arc<Runtime>,
}

impl BlobStore {
    /// Create a store for `key` in `inner`.
    ///
    /// `url` is only used for display.
    #[must_use]
    pub fn new(
        inner: Arc<dyn ObjectStore>,
        key: Path,
        url: impl Into<String>,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            inner,
            key,
            url: url.into(),
            runtime,
        }
    }

    /// Get the object key within the bucket.
    #[must_use]
    pub const fn key(&self) -> &Path {
        &self.key
    }
}

impl fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore")
            .field("url", &self.url)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl ByteStore for BlobStore {
    fn exists(&self) -> Result<bool> {
        match self.runtime.block_on(self.inner.head(&self.key)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let payload = PutPayload::from(bytes.to_vec());
        self.runtime.block_on(self.inner.put(&self.key, payload))?;
        debug!(url = %self.url, bytes = bytes.len(), "put object");
        Ok(())
    }

    fn load(&self) -> Result<Vec<u8>> {
        let bytes = self.runtime.block_on(async {
            let result = self.inner.get(&self.key).await?;
            result.bytes().await
        });
        let bytes = bytes.map_err(|e| match e {
            object_store::Error::NotFound { .. } => Error::not_found(self.location()),
            other => Error::ObjectStore(other),
        })?;
        debug!(url = %self.url, bytes = bytes.len(), "got object");
        Ok(bytes.to_vec())
    }

    fn delete(&self) -> Result<()> {
        match self.runtime.block_on(self.inner.delete(&self.key)) {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                debug!(url = %self.url, "deleted object");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self) -> String {
        self.url.clone()
    }
}
