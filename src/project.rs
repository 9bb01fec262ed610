//! Project root and backend dispatch
//!
//! A project root is either a local path or an object storage URI. Every
//! store handed out by [`ProjectStorage`] lives beneath that root, so the rest
//! of the crate never inspects schemes or paths.
//!
//! | Root                   | Backend                                  |
//! |------------------------|------------------------------------------|
//! | `/data/project`        | local filesystem                         |
//! | `file:///data/project` | local filesystem                         |
//! | `s3://bucket/prefix`   | S3, configured from `AWS_*` env vars     |
//! | `memory://name`        | in-process object store                  |

use crate::matrix::{MatrixFormat, MatrixStorageEngine, MatrixStore};
use crate::model::ModelStorageEngine;
use crate::storage::{BlobStore, FsStore, Store};
use crate::{Error, Result};
use object_store::memory::InMemory;
use object_store::ObjectStore;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Default directory (relative to the project root) for trained models
pub const DEFAULT_MODEL_DIRECTORY: &str = "trained_models";

#[derive(Clone)]
enum Root {
    Local(PathBuf),
    Object {
        inner: Arc<dyn ObjectStore>,
        scheme: String,
        bucket: String,
        prefix: String,
        runtime: Arc<Runtime>,
    },
}

/// Factory for stores scoped beneath one project root.
///
/// Cheap to clone; clones share the object store client and runtime.
///
/// # Example
///
/// ```rust
/// use matrix_vault::storage::ByteStore;
/// use matrix_vault::ProjectStorage;
///
/// # fn main() -> matrix_vault::Result<()> {
/// let dir = tempfile::tempdir()?;
/// let project = ProjectStorage::new(dir.path().to_str().unwrap())?;
///
/// let store = project.get_store(&["reports", "summary.txt"])?;
/// store.write(b"ok")?;
/// assert!(dir.path().join("reports").join("summary.txt").exists());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProjectStorage {
    root: Root,
}

impl ProjectStorage {
    /// Open a project root, picking the backend from its scheme.
    ///
    /// # Errors
    ///
    /// Returns error if the scheme is unsupported or the object store
    /// client cannot be built.
    pub fn new(root: &str) -> Result<Self> {
        Self::builder(root).build()
    }

    /// Create a builder for a project root.
    #[must_use]
    pub fn builder(root: impl Into<String>) -> ProjectStorageBuilder {
        ProjectStorageBuilder::new(root)
    }

    /// True if the root lives on object storage.
    #[must_use]
    pub const fn is_object_storage(&self) -> bool {
        matches!(self.root, Root::Object { .. })
    }

    /// Get a byte store for `segments` joined beneath the root. No I/O.
    ///
    /// Empty segments are skipped. A segment may contain `/` separators.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLocation` if a segment is absolute or climbs out of
    /// the root with `..`.
    pub fn get_store<S: AsRef<str>>(&self, segments: &[S]) -> Result<Store> {
        for segment in segments {
            check_segment(segment.as_ref())?;
        }

        let store = match &self.root {
            Root::Local(path) => {
                let mut path = path.clone();
                for segment in segments {
                    let segment: &str = segment.as_ref();
                    if !segment.is_empty() {
                        path.push(segment);
                    }
                }
                Store::Fs(FsStore::new(path))
            }
            Root::Object {
                inner,
                scheme,
                bucket,
                prefix,
                runtime,
            } => {
                let key = std::iter::once(prefix.as_str())
                    .chain(segments.iter().map(AsRef::<str>::as_ref))
                    .map(|s| s.trim_matches('/'))
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join("/");
                let url = format!("{scheme}://{bucket}/{key}");
                Store::Blob(BlobStore::new(
                    Arc::clone(inner),
                    object_store::path::Path::from(key),
                    url,
                    Arc::clone(runtime),
                ))
            }
        };
        Ok(store)
    }

    /// Get a lazy matrix store for `matrix_uuid` under `directories`.
    ///
    /// The body is stored at `<uuid><format suffix>` and the metadata
    /// sidecar at `<uuid>.yaml`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLocation` if a directory or the uuid escapes the root.
    pub fn matrix_store<S: AsRef<str>>(
        &self,
        directories: &[S],
        matrix_uuid: &str,
        format: MatrixFormat,
    ) -> Result<MatrixStore> {
        let (body, sidecar) = self.matrix_locations(directories, matrix_uuid, format)?;
        Ok(MatrixStore::new(matrix_uuid, format, body, sidecar))
    }

    pub(crate) fn matrix_locations<S: AsRef<str>>(
        &self,
        directories: &[S],
        matrix_uuid: &str,
        format: MatrixFormat,
    ) -> Result<(Store, Store)> {
        let with_file = |file: String| {
            let mut segments: Vec<&str> = directories.iter().map(AsRef::<str>::as_ref).collect();
            segments.push(&file);
            self.get_store(&segments)
        };
        Ok((
            with_file(format!("{matrix_uuid}{}", format.suffix()))?,
            with_file(format!("{matrix_uuid}.yaml"))?,
        ))
    }

    /// Get a matrix storage engine for one format and directory.
    #[must_use]
    pub fn matrix_storage_engine(
        &self,
        format: MatrixFormat,
        directories: Vec<String>,
    ) -> MatrixStorageEngine {
        MatrixStorageEngine::new(self.clone(), format, directories)
    }

    /// Get a model storage engine under [`DEFAULT_MODEL_DIRECTORY`].
    #[must_use]
    pub fn model_storage_engine<T>(&self) -> ModelStorageEngine<T> {
        self.model_storage_engine_in(DEFAULT_MODEL_DIRECTORY)
    }

    /// Get a model storage engine under `model_directory`.
    #[must_use]
    pub fn model_storage_engine_in<T>(&self, model_directory: &str) -> ModelStorageEngine<T> {
        ModelStorageEngine::new(self.clone(), model_directory)
    }
}

impl fmt::Debug for ProjectStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Root::Local(path) => f.debug_tuple("ProjectStorage").field(path).finish(),
            Root::Object {
                scheme,
                bucket,
                prefix,
                ..
            } => f
                .debug_tuple("ProjectStorage")
                .field(&format!("{scheme}://{bucket}/{prefix}"))
                .finish(),
        }
    }
}

/// Builder for `ProjectStorage`.
#[must_use]
pub struct ProjectStorageBuilder {
    root: String,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl ProjectStorageBuilder {
    /// Create a builder for `root`.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            object_store: None,
        }
    }

    /// Use `store` as the client for a URI root instead of building one.
    ///
    /// Ignored for local roots.
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    /// Build the project storage.
    ///
    /// # Errors
    ///
    /// Returns error if the root is not a path or a supported URI, or if the
    /// S3 client cannot be configured.
    pub fn build(self) -> Result<ProjectStorage> {
        let Some(url) = parse_uri(&self.root) else {
            return Ok(ProjectStorage {
                root: Root::Local(PathBuf::from(&self.root)),
            });
        };

        let scheme = url.scheme().to_string();
        if scheme == "file" {
            let path = url
                .to_file_path()
                .map_err(|()| Error::InvalidLocation(self.root.clone()))?;
            return Ok(ProjectStorage {
                root: Root::Local(path),
            });
        }

        let bucket = url.host_str().unwrap_or_default().to_string();
        let prefix = url.path().trim_matches('/').to_string();
        let inner: Arc<dyn ObjectStore> = match (self.object_store, scheme.as_str()) {
            (Some(store), _) => store,
            (None, "memory") => Arc::new(InMemory::new()),
            (None, "s3") => {
                if bucket.is_empty() {
                    return Err(Error::InvalidLocation(format!(
                        "{}: S3 URI must include a bucket name",
                        self.root
                    )));
                }
                Arc::new(
                    object_store::aws::AmazonS3Builder::from_env()
                        .with_bucket_name(&bucket)
                        .build()?,
                )
            }
            (None, other) => {
                return Err(Error::InvalidLocation(format!(
                    "{}: unsupported scheme '{other}'",
                    self.root
                )))
            }
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(ProjectStorage {
            root: Root::Object {
                inner,
                scheme,
                bucket,
                prefix,
                runtime: Arc::new(runtime),
            },
        })
    }
}

/// Reject a segment that is absolute or climbs above where it is joined.
fn check_segment(segment: &str) -> Result<()> {
    let escapes = Path::new(segment)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(Error::InvalidLocation(format!(
            "{segment}: path segment must stay beneath the project root"
        )));
    }
    Ok(())
}

/// Parse `root` as a URI, or `None` for plain paths.
///
/// Single-letter schemes are Windows drive letters, not URIs.
fn parse_uri(root: &str) -> Option<url::Url> {
    if !root.contains("://") {
        return None;
    }
    url::Url::parse(root)
        .ok()
        .filter(|url| url.scheme().len() > 1)
}
