//! Byte-level persistence over one physical backend
//!
//! A store is bound to a single location and moves whole objects:
//! - `write` creates or overwrites the full object (never appends)
//! - `load` fails with [`Error::NotFound`](crate::Error::NotFound) when nothing is stored
//! - `delete` removes only that object and is a no-op when it is already gone
//!
//! Stores hold no cache and perform no retries. Which variant backs a
//! location is decided once by [`ProjectStorage`](crate::ProjectStorage).
//!
//! # Example
//!
//! ```rust
//! use matrix_vault::storage::{ByteStore, FsStore};
//!
//! # fn main() -> matrix_vault::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let store = FsStore::new(dir.path().join("a_path"));
//!
//! assert!(!store.exists()?);
//! store.write(b"val")?;
//! assert_eq!(store.load()?, b"val".to_vec());
//! store.delete()?;
//! assert!(!store.exists()?);
//! # Ok(())
//! # }
//! ```

mod blob;
mod fs;

pub use blob::BlobStore;
pub use fs::FsStore;

use crate::Result;

/// Whole-object persistence at one location.
pub trait ByteStore {
    /// Check whether an object is stored at this location.
    fn exists(&self) -> Result<bool>;

    /// Store `bytes`, replacing any existing object.
    fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Read the full object.
    ///
    /// Fails with `NotFound` if [`exists`](Self::exists) would be false.
    fn load(&self) -> Result<Vec<u8>>;

    /// Remove the object. No-op if it doesn't exist.
    fn delete(&self) -> Result<()>;

    /// Human-readable location, used in errors and logs.
    fn location(&self) -> String;
}

/// The closed set of backends a project can live on.
#[derive(Debug, Clone)]
pub enum Store {
    /// Local filesystem
    Fs(FsStore),
    /// Object storage (S3 or in-memory)
    Blob(BlobStore),
}

impl ByteStore for Store {
    fn exists(&self) -> Result<bool> {
        match self {
            Self::Fs(store) => store.exists(),
            Self::Blob(store) => store.exists(),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Fs(store) => store.write(bytes),
            Self::Blob(store) => store.write(bytes),
        }
    }

    fn load(&self) -> Result<Vec<u8>> {
        match self {
            Self::Fs(store) => store.load(),
            Self::Blob(store) => store.load(),
        }
    }

    fn delete(&self) -> Result<()> {
        match self {
            Self::Fs(store) => store.delete(),
            Self::Blob(store) => store.delete(),
        }
    }

    fn location(&self) -> String {
        match self {
            Self::Fs(store) => store.location(),
            Self::Blob(store) => store.location(),
        }
    }
}
