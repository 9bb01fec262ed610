//! Matrix stores: one design matrix bound to one metadata sidecar
//!
//! ## Lifecycle
//!
//! ```text
//! UNLOADED ──(first access)──> LOADED ──(save)──> SAVED
//!     ^                           │
//!     └────(cache scope exit)─────┘
//! ```
//!
//! Metadata and matrix are memoized separately. Metadata is kept for the
//! life of the store; the matrix and labels are dropped when a
//! [`MatrixStore::cache`] scope ends and re-read on the next access.
//! A matrix assigned in memory and not yet saved is never dropped.
//!
//! ## Usage
//!
//! ```rust
//! use arrow::array::{Float64Array, Int64Array};
//! use arrow::datatypes::{DataType, Field, Schema};
//! use arrow::record_batch::RecordBatch;
//! use matrix_vault::matrix::{MatrixFormat, MatrixMetadata, MatrixStore};
//! use matrix_vault::ProjectStorage;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! let project = ProjectStorage::new(dir.path().to_str().unwrap())?;
//!
//! let schema = Schema::new(vec![
//!     Field::new("entity_id", DataType::Int64, true),
//!     Field::new("k_feature", DataType::Float64, true),
//!     Field::new("label", DataType::Int64, true),
//! ]);
//! let matrix = RecordBatch::try_new(
//!     Arc::new(schema),
//!     vec![
//!         Arc::new(Int64Array::from(vec![1, 2])),
//!         Arc::new(Float64Array::from(vec![0.5, 0.4])),
//!         Arc::new(Int64Array::from(vec![0, 1])),
//!     ],
//! )?;
//!
//! let (body, sidecar) = (
//!     project.get_store(&["matrices", "abc.parquet"])?,
//!     project.get_store(&["matrices", "abc.yaml"])?,
//! );
//! let mut store = MatrixStore::with_matrix(
//!     "abc",
//!     MatrixFormat::Parquet,
//!     body,
//!     sidecar,
//!     &matrix,
//!     MatrixMetadata::new("label", ["entity_id"]),
//! )?;
//! store.save()?;
//!
//! let mut reloaded = project.matrix_store(&["matrices"], "abc", MatrixFormat::Parquet)?;
//! assert_eq!(reloaded.columns()?, vec!["k_feature"]);
//! # Ok(())
//! # }
//! ```

mod format;
mod frame;
mod metadata;

pub use format::MatrixFormat;
pub use frame::{DesignMatrix, Labels};
pub use metadata::{MatrixMetadata, MatrixMetadataBuilder, MatrixType, AS_OF_DATE};

use crate::storage::{ByteStore, Store};
use crate::{Error, ProjectStorage, Result};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use metadata::Sidecar;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

/// Decoded matrix and labels held by a store.
#[derive(Debug)]
struct Loaded {
    matrix: DesignMatrix,
    labels: Labels,
    /// Assigned in memory and not yet written to the backing store
    unsaved: bool,
}

/// A design matrix plus its metadata sidecar at two byte store locations.
///
/// Not synchronized: use one instance per worker.
#[derive(Debug)]
pub struct MatrixStore {
    matrix_uuid: String,
    format: MatrixFormat,
    matrix_base_store: Store,
    metadata_base_store: Store,
    metadata: Option<MatrixMetadata>,
    /// Body column types recorded in the sidecar
    column_types: BTreeMap<String, DataType>,
    loaded: Option<Loaded>,
    should_cache: bool,
}

impl MatrixStore {
    /// Create a lazy store. No I/O happens until the first access.
    #[must_use]
    pub fn new(
        matrix_uuid: impl Into<String>,
        format: MatrixFormat,
        matrix_base_store: Store,
        metadata_base_store: Store,
    ) -> Self {
        Self {
            matrix_uuid: matrix_uuid.into(),
            format,
            matrix_base_store,
            metadata_base_store,
            metadata: None,
            column_types: BTreeMap::new(),
            loaded: None,
            should_cache: false,
        }
    }

    /// Create a store already holding a matrix (label column included).
    ///
    /// The label column named by `metadata` is split off immediately.
    ///
    /// # Errors
    /// Returns `Validation` if the label or an index column is missing
    pub fn with_matrix(
        matrix_uuid: impl Into<String>,
        format: MatrixFormat,
        matrix_base_store: Store,
        metadata_base_store: Store,
        matrix: &RecordBatch,
        metadata: MatrixMetadata,
    ) -> Result<Self> {
        let (matrix, labels) =
            DesignMatrix::split_label(matrix, metadata.indices(), metadata.label_name())?;
        let mut store = Self::new(matrix_uuid, format, matrix_base_store, metadata_base_store);
        store.metadata = Some(metadata);
        store.loaded = Some(Loaded {
            matrix,
            labels,
            unsaved: true,
        });
        Ok(store)
    }

    /// Matrix identifier.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.matrix_uuid
    }

    /// Body format.
    #[must_use]
    pub const fn format(&self) -> MatrixFormat {
        self.format
    }

    /// Location of the matrix body.
    #[must_use]
    pub const fn matrix_base_store(&self) -> &Store {
        &self.matrix_base_store
    }

    /// Location of the metadata sidecar.
    #[must_use]
    pub const fn metadata_base_store(&self) -> &Store {
        &self.metadata_base_store
    }

    /// Metadata, read from the sidecar on first access.
    ///
    /// # Errors
    /// Returns `NotFound` if no sidecar exists and none was assigned, or
    /// `Format` if the sidecar does not decode
    pub fn metadata(&mut self) -> Result<&MatrixMetadata> {
        let metadata = match self.metadata.take() {
            Some(metadata) => metadata,
            None => {
                let bytes = self.metadata_base_store.load()?;
                let sidecar = Sidecar::from_yaml(&bytes)?;
                self.column_types = sidecar.column_types()?;
                debug!(
                    matrix_uuid = %self.matrix_uuid,
                    typed_columns = self.column_types.len(),
                    "loaded matrix metadata"
                );
                sidecar.metadata
            }
        };
        Ok(self.metadata.insert(metadata))
    }

    /// Replace the metadata in memory. Written on the next [`save`](Self::save).
    pub fn set_metadata(&mut self, metadata: MatrixMetadata) {
        self.metadata = Some(metadata);
    }

    /// Label column name from the metadata.
    ///
    /// # Errors
    /// Returns error if the metadata cannot be loaded
    pub fn label_column_name(&mut self) -> Result<String> {
        Ok(self.metadata()?.label_name().to_string())
    }

    /// Matrix type from the metadata.
    ///
    /// # Errors
    /// Returns `MissingMetadata` if the metadata has no `matrix_type`
    pub fn matrix_type(&mut self) -> Result<MatrixType> {
        self.metadata()?
            .matrix_type()
            .ok_or_else(|| Error::MissingMetadata("matrix_type".to_string()))
    }

    fn ensure_loaded(&mut self) -> Result<&Loaded> {
        let loaded = match self.loaded.take() {
            Some(loaded) => loaded,
            None => self.read_matrix()?,
        };
        Ok(self.loaded.insert(loaded))
    }

    fn read_matrix(&mut self) -> Result<Loaded> {
        let (index_names, label_name) = {
            let metadata = self.metadata()?;
            (metadata.indices().to_vec(), metadata.label_name().to_string())
        };

        let bytes = self.matrix_base_store.load()?;
        let body = self.format.decode_with_types(&bytes, &self.column_types)?;
        let (matrix, labels) = DesignMatrix::split_label(&body, &index_names, &label_name)?;
        debug!(
            matrix_uuid = %self.matrix_uuid,
            format = %self.format,
            rows = matrix.num_rows(),
            "loaded matrix body"
        );

        Ok(Loaded {
            matrix,
            labels,
            unsaved: false,
        })
    }

    /// Design matrix (index and features, no label), decoded on first access.
    ///
    /// # Errors
    /// Returns `NotFound` if there is no body and none was assigned, or
    /// `Format` if the body does not decode
    pub fn design_matrix(&mut self) -> Result<&DesignMatrix> {
        Ok(&self.ensure_loaded()?.matrix)
    }

    /// Label column, row-aligned with [`design_matrix`](Self::design_matrix).
    ///
    /// # Errors
    /// Same as [`design_matrix`](Self::design_matrix)
    pub fn labels(&mut self) -> Result<&Labels> {
        Ok(&self.ensure_loaded()?.labels)
    }

    /// Design matrix and labels together.
    ///
    /// # Errors
    /// Same as [`design_matrix`](Self::design_matrix)
    pub fn matrix_label_tuple(&mut self) -> Result<(&DesignMatrix, &Labels)> {
        let loaded = self.ensure_loaded()?;
        Ok((&loaded.matrix, &loaded.labels))
    }

    /// Replace the matrix and labels in memory. Written on the next
    /// [`save`](Self::save).
    ///
    /// # Errors
    /// Returns `Validation` if the row counts differ
    pub fn set_matrix_label_tuple(&mut self, matrix: DesignMatrix, labels: Labels) -> Result<()> {
        if matrix.num_rows() != labels.len() {
            return Err(Error::Validation(format!(
                "Matrix has {} rows but {} labels were given",
                matrix.num_rows(),
                labels.len()
            )));
        }
        self.loaded = Some(Loaded {
            matrix,
            labels,
            unsaved: true,
        });
        Ok(())
    }

    /// Feature column names in stored order (no index, no label).
    ///
    /// # Errors
    /// Same as [`design_matrix`](Self::design_matrix)
    pub fn columns(&mut self) -> Result<Vec<String>> {
        Ok(self.design_matrix()?.feature_names())
    }

    /// Feature column names followed by the label column name.
    ///
    /// # Errors
    /// Same as [`design_matrix`](Self::design_matrix)
    pub fn columns_with_label(&mut self) -> Result<Vec<String>> {
        let (matrix, labels) = self.matrix_label_tuple()?;
        let mut columns = matrix.feature_names();
        columns.push(labels.name().to_string());
        Ok(columns)
    }

    /// Design matrix with features reordered to `columns`.
    ///
    /// Only an exact (possibly permuted) match of the feature set succeeds.
    ///
    /// # Errors
    /// Returns `Validation` if `columns` is a subset, a superset, or a
    /// different set of names than the stored features, or has duplicates
    pub fn matrix_with_sorted_columns<S: AsRef<str>>(
        &mut self,
        columns: &[S],
    ) -> Result<DesignMatrix> {
        let desired: Vec<&str> = columns.iter().map(AsRef::<str>::as_ref).collect();
        let matrix = self.design_matrix()?;
        let actual = matrix.feature_names();

        let actual_set: BTreeSet<&str> = actual.iter().map(String::as_str).collect();
        let desired_set: BTreeSet<&str> = desired.iter().copied().collect();

        if desired_set.len() != desired.len() {
            return Err(Error::Validation(format!(
                "Desired columns contain duplicates: {desired:?}"
            )));
        }

        if actual_set == desired_set {
            let reordered = matrix.with_feature_order(&desired)?;
            if actual.iter().map(String::as_str).ne(desired.iter().copied()) {
                warn!(
                    matrix_uuid = %self.matrix_uuid,
                    "Column orders not the same, re-ordering"
                );
            }
            return Ok(reordered);
        }

        let missing: Vec<&str> = actual_set.difference(&desired_set).copied().collect();
        let extra: Vec<&str> = desired_set.difference(&actual_set).copied().collect();
        let message = if extra.is_empty() {
            format!("Desired columns are a subset of the matrix columns; missing {missing:?}")
        } else if missing.is_empty() {
            format!("Desired columns are a superset of the matrix columns; extra {extra:?}")
        } else {
            format!("Desired columns do not match the matrix columns; missing {missing:?}, extra {extra:?}")
        };
        Err(Error::Validation(message))
    }

    /// Snapshot dates covered by the matrix.
    ///
    /// Panel matrices (`as_of_date` in the index) return the distinct dates
    /// present, sorted. Entity-only matrices return the declared `end_time`.
    ///
    /// # Errors
    /// Returns `MissingMetadata` if an entity-only matrix has no `end_time`
    pub fn as_of_dates(&mut self) -> Result<Vec<String>> {
        let metadata = self.metadata()?;
        if !metadata.is_panel() {
            return metadata
                .end_time()
                .map(|end_time| vec![end_time.to_string()])
                .ok_or_else(|| Error::MissingMetadata("end_time".to_string()));
        }
        self.design_matrix()?.distinct_formatted(AS_OF_DATE)
    }

    /// Number of distinct entities (values of the first index column).
    ///
    /// # Errors
    /// Same as [`design_matrix`](Self::design_matrix)
    pub fn num_entities(&mut self) -> Result<usize> {
        let matrix = self.design_matrix()?;
        match matrix.index_names().first() {
            Some(entity) => Ok(matrix.distinct_formatted(entity)?.len()),
            None => Ok(matrix.num_rows()),
        }
    }

    /// True if the matrix has no rows, or there is no matrix to load.
    ///
    /// # Errors
    /// Returns error if an existing body cannot be read or decoded
    pub fn empty(&mut self) -> Result<bool> {
        if self.loaded.is_none() && !self.matrix_base_store.exists()? {
            return Ok(true);
        }
        Ok(self.design_matrix()?.is_empty())
    }

    /// True if both the body and the sidecar exist in the backing store.
    ///
    /// # Errors
    /// Returns error if the backend cannot be reached
    pub fn exists(&self) -> Result<bool> {
        Ok(self.matrix_base_store.exists()? && self.metadata_base_store.exists()?)
    }

    /// Write the matrix body, then the metadata sidecar.
    ///
    /// The sidecar also records the Arrow type of every body column, so a
    /// CSV body reloads with the types it was saved with.
    ///
    /// The two writes are independent: if the sidecar write fails, the new
    /// body stays in place and the error is returned.
    ///
    /// # Errors
    /// Returns error if there is nothing to save or either write fails
    pub fn save(&mut self) -> Result<()> {
        let format = self.format;
        let metadata = self.metadata()?.clone();
        let loaded = self.ensure_loaded()?;
        let batch = loaded.matrix.with_label(&loaded.labels)?;
        let body = format.encode(&batch)?;
        let sidecar = Sidecar::new(metadata, &batch.schema());
        let sidecar_bytes = sidecar.to_yaml()?;

        self.matrix_base_store.write(&body)?;
        self.metadata_base_store.write(&sidecar_bytes)?;
        self.column_types = sidecar.column_types()?;
        if let Some(loaded) = self.loaded.as_mut() {
            loaded.unsaved = false;
        }
        debug!(
            matrix_uuid = %self.matrix_uuid,
            location = %self.matrix_base_store.location(),
            bytes = body.len(),
            "saved matrix"
        );
        Ok(())
    }

    /// Open a caching scope. The decoded matrix is dropped when the
    /// returned guard goes out of scope, on every exit path.
    ///
    /// ```rust,no_run
    /// # use matrix_vault::{matrix::MatrixFormat, ProjectStorage};
    /// # fn main() -> matrix_vault::Result<()> {
    /// # let project = ProjectStorage::new("/tmp/project")?;
    /// let mut store = project.matrix_store(&["matrices"], "abc", MatrixFormat::CsvGz)?;
    /// {
    ///     let mut cached = store.cache();
    ///     let rows = cached.design_matrix()?.num_rows();
    ///     let labels = cached.labels()?.len(); // served from memory
    ///     assert_eq!(rows, labels);
    /// }
    /// // the next access reads the body again
    /// # Ok(())
    /// # }
    /// ```
    pub fn cache(&mut self) -> MatrixCacheGuard<'_> {
        self.should_cache = true;
        MatrixCacheGuard { store: self }
    }

    /// True while a caching scope is open.
    #[must_use]
    pub const fn is_caching(&self) -> bool {
        self.should_cache
    }

    /// True if a decoded matrix is held in memory.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Drop the decoded matrix unless it holds unsaved data.
    pub fn clear_cache(&mut self) {
        if self.loaded.as_ref().is_some_and(|loaded| !loaded.unsaved) {
            self.loaded = None;
            debug!(matrix_uuid = %self.matrix_uuid, "cleared matrix cache");
        }
    }
}

/// Caching scope for a [`MatrixStore`]; clears the cache on drop.
#[must_use = "the cache is cleared as soon as the guard is dropped"]
pub struct MatrixCacheGuard<'a> {
    store: &'a mut MatrixStore,
}

impl Deref for MatrixCacheGuard<'_> {
    type Target = MatrixStore;

    fn deref(&self) -> &MatrixStore {
        self.store
    }
}

impl DerefMut for MatrixCacheGuard<'_> {
    fn deref_mut(&mut self) -> &mut MatrixStore {
        self.store
    }
}

impl Drop for MatrixCacheGuard<'_> {
    fn drop(&mut self) {
        self.store.clear_cache();
        self.store.should_cache = false;
    }
}

/// Mints [`MatrixStore`]s for one format under one directory.
#[derive(Debug, Clone)]
pub struct MatrixStorageEngine {
    project_storage: ProjectStorage,
    format: MatrixFormat,
    directories: Vec<String>,
}

impl MatrixStorageEngine {
    /// Create an engine rooted at `directories` in `project_storage`.
    #[must_use]
    pub fn new(project_storage: ProjectStorage, format: MatrixFormat, directories: Vec<String>) -> Self {
        Self {
            project_storage,
            format,
            directories,
        }
    }

    /// Body format used by every store from this engine.
    #[must_use]
    pub const fn format(&self) -> MatrixFormat {
        self.format
    }

    /// Get a lazy store for `matrix_uuid`.
    ///
    /// # Errors
    /// Returns `InvalidLocation` if the uuid escapes the engine's directory
    pub fn get_store(&self, matrix_uuid: &str) -> Result<MatrixStore> {
        self.project_storage
            .matrix_store(self.directories.as_slice(), matrix_uuid, self.format)
    }

    /// Get a store for `matrix_uuid` already holding `matrix` and `metadata`.
    ///
    /// # Errors
    /// Returns `Validation` if the label or an index column is missing, or
    /// `InvalidLocation` if the uuid escapes the engine's directory
    pub fn store_with_matrix(
        &self,
        matrix_uuid: &str,
        matrix: &RecordBatch,
        metadata: MatrixMetadata,
    ) -> Result<MatrixStore> {
        let (body, sidecar) =
            self.project_storage
                .matrix_locations(self.directories.as_slice(), matrix_uuid, self.format)?;
        MatrixStore::with_matrix(matrix_uuid, self.format, body, sidecar, matrix, metadata)
    }

    /// True if both body and sidecar exist for `matrix_uuid`.
    ///
    /// # Errors
    /// Returns error if the backend cannot be reached
    pub fn exists(&self, matrix_uuid: &str) -> Result<bool> {
        self.get_store(matrix_uuid)?.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn project() -> (tempfile::TempDir, ProjectStorage) {
        let dir = tempfile::tempdir().unwrap();
        let project = ProjectStorage::new(dir.path().to_str().unwrap()).unwrap();
        (dir, project)
    }

    fn matrix() -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("entity_id", DataType::Int64, true),
            Field::new("k_feature", DataType::Float64, true),
            Field::new("m_feature", DataType::Float64, true),
            Field::new("label", DataType::Int64, true),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(Float64Array::from(vec![0.5, 0.4])),
                Arc::new(Float64Array::from(vec![0.4, 0.5])),
                Arc::new(Int64Array::from(vec![0, 1])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_lazy_store_does_no_io() {
        let (dir, project) = project();
        let store = project
            .matrix_store(&["matrices"], "abc", MatrixFormat::CsvGz)
            .unwrap();

        assert!(!store.is_loaded());
        assert!(!dir.path().join("matrices").exists());
    }

    #[test]
    fn test_missing_body_is_not_found() {
        let (_dir, project) = project();
        let mut store = project
            .matrix_store(&["matrices"], "abc", MatrixFormat::CsvGz)
            .unwrap();
        store.set_metadata(MatrixMetadata::new("label", ["entity_id"]));

        assert!(store.design_matrix().unwrap_err().is_not_found());
        assert!(store.empty().unwrap());
        assert!(!store.exists().unwrap());
    }

    #[test]
    fn test_unsaved_matrix_survives_cache_scope() {
        let (_dir, project) = project();
        let engine = project.matrix_storage_engine(MatrixFormat::CsvGz, vec!["m".to_string()]);
        let mut store = engine
            .store_with_matrix("abc", &matrix(), MatrixMetadata::new("label", ["entity_id"]))
            .unwrap();

        {
            let mut cached = store.cache();
            assert!(cached.is_caching());
            assert_eq!(cached.columns().unwrap(), vec!["k_feature", "m_feature"]);
        }

        assert!(!store.is_caching());
        assert!(store.is_loaded());

        store.save().unwrap();
        {
            let _cached = store.cache();
        }
        assert!(!store.is_loaded());
        assert_eq!(store.columns().unwrap(), vec!["k_feature", "m_feature"]);
    }

    #[test]
    fn test_set_matrix_label_tuple_row_mismatch() {
        let (_dir, project) = project();
        let mut store = project
            .matrix_store(&["m"], "abc", MatrixFormat::Parquet)
            .unwrap();
        let (matrix, _) =
            DesignMatrix::split_label(&matrix(), &["entity_id".to_string()], "label").unwrap();
        let labels = Labels::new("label", Arc::new(Int64Array::from(vec![1])));

        let err = store.set_matrix_label_tuple(matrix, labels).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_sorted_columns_rejects_duplicates() {
        let (_dir, project) = project();
        let engine = project.matrix_storage_engine(MatrixFormat::CsvGz, vec![]);
        let mut store = engine
            .store_with_matrix("abc", &matrix(), MatrixMetadata::new("label", ["entity_id"]))
            .unwrap();

        let err = store
            .matrix_with_sorted_columns(&["k_feature", "m_feature", "k_feature"])
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_columns_with_label() {
        let (_dir, project) = project();
        let engine = project.matrix_storage_engine(MatrixFormat::CsvGz, vec![]);
        let mut store = engine
            .store_with_matrix("abc", &matrix(), MatrixMetadata::new("label", ["entity_id"]))
            .unwrap();

        assert_eq!(
            store.columns_with_label().unwrap(),
            vec!["k_feature", "m_feature", "label"]
        );
        assert_eq!(store.num_entities().unwrap(), 2);
        assert!(store.matrix_type().unwrap_err().to_string().contains("matrix_type"));
    }

    #[test]
    fn test_engine_rejects_escaping_uuid() {
        let (dir, project) = project();
        let engine = project.matrix_storage_engine(MatrixFormat::Parquet, vec!["m".to_string()]);

        assert!(matches!(engine.get_store("../abc").unwrap_err(), Error::InvalidLocation(_)));
        assert!(matches!(engine.exists("../abc").unwrap_err(), Error::InvalidLocation(_)));
        let err = engine
            .store_with_matrix("../abc", &matrix(), MatrixMetadata::new("label", ["entity_id"]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLocation(_)));
        assert!(!dir.path().join("abc.yaml").exists());
    }
}
