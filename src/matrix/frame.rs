//! In-memory design matrix and label column (Arrow-backed)

use crate::{Error, Result};
use arrow::array::{Array, ArrayRef};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Feature table keyed by its index columns.
///
/// Index columns always come first in the batch, in declared order; feature
/// columns follow in their stored order. The label column is never part of a
/// design matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    index_names: Vec<String>,
    batch: RecordBatch,
}

impl DesignMatrix {
    /// Build a design matrix, moving the index columns to the front.
    ///
    /// # Errors
    /// Returns `Validation` if an index column is missing from `batch`
    pub fn new<I, S>(index_names: I, batch: RecordBatch) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let index_names: Vec<String> = index_names.into_iter().map(Into::into).collect();
        let schema = batch.schema();

        let mut order = Vec::with_capacity(schema.fields().len());
        for name in &index_names {
            let position = schema.index_of(name).map_err(|_| {
                Error::Validation(format!("Index column '{name}' not found in matrix"))
            })?;
            order.push(position);
        }
        order.extend(
            (0..schema.fields().len()).filter(|i| !index_names.contains(schema.field(*i).name())),
        );

        let batch = batch.project(&order)?;
        Ok(Self { index_names, batch })
    }

    /// Index column names.
    #[must_use]
    pub fn index_names(&self) -> &[String] {
        &self.index_names
    }

    /// Feature column names, in stored order.
    #[must_use]
    pub fn feature_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .skip(self.index_names.len())
            .map(|field| field.name().clone())
            .collect()
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// True if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    /// Index plus feature columns.
    #[must_use]
    pub const fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Get a column (index or feature) by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    /// Feature columns only, without the index.
    ///
    /// # Errors
    /// Returns error if the projection fails
    pub fn features(&self) -> Result<RecordBatch> {
        let order: Vec<usize> = (self.index_names.len()..self.batch.num_columns()).collect();
        Ok(self.batch.project(&order)?)
    }

    /// Keep the index and reorder the features to `columns`.
    ///
    /// Callers are expected to have checked that `columns` is exactly the
    /// feature set.
    pub(crate) fn with_feature_order(&self, columns: &[&str]) -> Result<Self> {
        let schema = self.batch.schema();
        let mut order: Vec<usize> = (0..self.index_names.len()).collect();
        for name in columns {
            order.push(schema.index_of(name)?);
        }
        Ok(Self {
            index_names: self.index_names.clone(),
            batch: self.batch.project(&order)?,
        })
    }

    /// Distinct values of an index column, formatted and sorted.
    pub(crate) fn distinct_formatted(&self, name: &str) -> Result<Vec<String>> {
        let column = self
            .column(name)
            .ok_or_else(|| Error::Validation(format!("Column '{name}' not found in matrix")))?;
        let formatter = ArrayFormatter::try_new(column.as_ref(), &FormatOptions::default())?;

        let values: BTreeSet<String> = (0..column.len())
            .filter(|&row| column.is_valid(row))
            .map(|row| formatter.value(row).to_string())
            .collect();
        Ok(values.into_iter().collect())
    }

    /// Append `labels` as the last column, producing the on-disk layout.
    pub(crate) fn with_label(&self, labels: &Labels) -> Result<RecordBatch> {
        let schema = self.batch.schema();
        let mut fields: Vec<Arc<Field>> = schema.fields().iter().cloned().collect();
        fields.push(Arc::new(Field::new(
            labels.name(),
            labels.values().data_type().clone(),
            true,
        )));

        let mut columns = self.batch.columns().to_vec();
        columns.push(Arc::clone(labels.values()));
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }

    /// Split a decoded body into the design matrix and its label column.
    ///
    /// # Errors
    /// Returns `Validation` if the label or an index column is missing
    pub fn split_label(
        batch: &RecordBatch,
        index_names: &[String],
        label_name: &str,
    ) -> Result<(Self, Labels)> {
        let schema = batch.schema();
        let label_position = schema.index_of(label_name).map_err(|_| {
            Error::Validation(format!("Label column '{label_name}' not found in matrix"))
        })?;

        let labels = Labels::new(label_name, Arc::clone(batch.column(label_position)));
        let rest: Vec<usize> = (0..batch.num_columns())
            .filter(|&i| i != label_position)
            .collect();
        let matrix = Self::new(index_names.iter().cloned(), batch.project(&rest)?)?;
        Ok((matrix, labels))
    }
}

/// The label column of a design matrix.
///
/// Row `i` of the labels belongs to row `i` of the matching design matrix.
#[derive(Debug, Clone)]
pub struct Labels {
    name: String,
    values: ArrayRef,
}

impl Labels {
    /// Create a label column.
    #[must_use]
    pub fn new(name: impl Into<String>, values: ArrayRef) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Label column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Label values.
    #[must_use]
    pub const fn values(&self) -> &ArrayRef {
        &self.values
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PartialEq for Labels {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.values.as_ref() == other.values.as_ref()
    }
}
