//! Matrix metadata sidecar

use crate::{Error, Result};
use arrow::datatypes::{DataType, Schema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Whether a matrix was built for training or for evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixType {
    /// Training matrix
    Train,
    /// Evaluation matrix
    Test,
}

/// Metadata document stored next to a matrix body.
///
/// `label_name` and `indices` drive decoding. Everything else the pipeline
/// writes (time bounds, identifiers, feature lists) is carried through
/// untouched in [`fields`](Self::fields).
///
/// # Example
///
/// ```rust
/// use matrix_vault::matrix::MatrixMetadata;
///
/// let metadata = MatrixMetadata::builder("label", ["entity_id", "as_of_date"])
///     .end_time("2016-01-01")
///     .field("matrix_id", "train_2016")
///     .build();
///
/// assert_eq!(metadata.label_name(), "label");
/// assert!(metadata.is_panel());
/// assert_eq!(metadata.end_time(), Some("2016-01-01"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixMetadata {
    label_name: String,
    indices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    matrix_type: Option<MatrixType>,
    #[serde(flatten)]
    fields: BTreeMap<String, serde_json::Value>,
}

/// Index column that marks a panel matrix.
pub const AS_OF_DATE: &str = "as_of_date";

impl MatrixMetadata {
    /// Create metadata with only the required keys.
    #[must_use]
    pub fn new<I, S>(label_name: impl Into<String>, indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label_name: label_name.into(),
            indices: indices.into_iter().map(Into::into).collect(),
            end_time: None,
            matrix_type: None,
            fields: BTreeMap::new(),
        }
    }

    /// Create a builder for metadata with optional fields.
    #[must_use]
    pub fn builder<I, S>(label_name: impl Into<String>, indices: I) -> MatrixMetadataBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MatrixMetadataBuilder {
            metadata: Self::new(label_name, indices),
        }
    }

    /// Name of the label column.
    #[must_use]
    pub fn label_name(&self) -> &str {
        &self.label_name
    }

    /// Ordered index column names.
    #[must_use]
    pub fn indices(&self) -> &[String] {
        &self.indices
    }

    /// True for `[entity, as_of_date]` panel matrices.
    #[must_use]
    pub fn is_panel(&self) -> bool {
        self.indices.iter().any(|name| name == AS_OF_DATE)
    }

    /// Declared end time, if any.
    #[must_use]
    pub fn end_time(&self) -> Option<&str> {
        self.end_time.as_deref()
    }

    /// Declared matrix type, if any.
    #[must_use]
    pub const fn matrix_type(&self) -> Option<MatrixType> {
        self.matrix_type
    }

    /// Pass-through fields.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.fields
    }

    /// Get a pass-through field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Encode as a YAML document.
    ///
    /// # Errors
    /// Returns error if a pass-through field cannot be represented in YAML
    pub fn to_yaml(&self) -> Result<Vec<u8>> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| Error::Format(format!("Failed to encode metadata: {e}")))
    }

    /// Decode a YAML document.
    ///
    /// # Errors
    /// Returns `Format` if the bytes are not YAML or lack `label_name`/`indices`
    pub fn from_yaml(bytes: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(bytes)
            .map_err(|e| Error::Format(format!("Failed to decode metadata: {e}")))
    }
}

/// Builder for `MatrixMetadata`.
#[derive(Debug)]
#[must_use]
pub struct MatrixMetadataBuilder {
    metadata: MatrixMetadata,
}

impl MatrixMetadataBuilder {
    /// Set the end time.
    pub fn end_time(mut self, end_time: impl Into<String>) -> Self {
        self.metadata.end_time = Some(end_time.into());
        self
    }

    /// Set the matrix type.
    pub fn matrix_type(mut self, matrix_type: MatrixType) -> Self {
        self.metadata.matrix_type = Some(matrix_type);
        self
    }

    /// Add a pass-through field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.fields.insert(key.into(), value.into());
        self
    }

    /// Build the metadata.
    #[must_use]
    pub fn build(self) -> MatrixMetadata {
        self.metadata
    }
}

/// Sidecar document as stored: the metadata keys plus `column_types`, the
/// Arrow type of every column in the body (label included).
///
/// Sidecars written by other tools may lack `column_types`; their bodies are
/// decoded by inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Sidecar {
    #[serde(flatten)]
    pub(crate) metadata: MatrixMetadata,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    column_types: BTreeMap<String, String>,
}

impl Sidecar {
    /// Sidecar for a body with `schema`.
    pub(crate) fn new(metadata: MatrixMetadata, schema: &Schema) -> Self {
        let column_types = schema
            .fields()
            .iter()
            .map(|field| (field.name().clone(), field.data_type().to_string()))
            .collect();
        Self {
            metadata,
            column_types,
        }
    }

    /// Recorded column types, parsed.
    pub(crate) fn column_types(&self) -> Result<BTreeMap<String, DataType>> {
        self.column_types
            .iter()
            .map(|(name, data_type)| {
                DataType::from_str(data_type)
                    .map(|parsed| (name.clone(), parsed))
                    .map_err(|e| {
                        Error::Format(format!("Invalid type '{data_type}' for column '{name}': {e}"))
                    })
            })
            .collect()
    }

    pub(crate) fn to_yaml(&self) -> Result<Vec<u8>> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| Error::Format(format!("Failed to encode metadata: {e}")))
    }

    pub(crate) fn from_yaml(bytes: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(bytes)
            .map_err(|e| Error::Format(format!("Failed to decode metadata: {e}")))
    }
}
