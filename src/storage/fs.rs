//! Filesystem-backed byte store.

use super::ByteStore;
use crate::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Byte store for a single file on the local filesystem.
///
/// Parent directories are created on write. Directories are never removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsStore {
    path: PathBuf,
}

impl FsStore {
    /// Create a store for `path`. No I/O happens until an operation is called.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteStore for FsStore {
    fn exists(&self) -> Result<bool> {
        Ok(self.path.try_exists()?)
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, bytes)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "wrote file");
        Ok(())
    }

    fn load(&self) -> Result<Vec<u8>> {
        let bytes = std::fs::read(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::not_found(self.location()),
            _ => Error::Io(e),
        })?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "read file");
        Ok(bytes)
    }

    fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "deleted file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
