//! Matrix body formats
//!
//! - [`MatrixFormat::CsvGz`]: gzip-compressed CSV with a header row. Human
//!   diffable; column types are inferred on read (Int64, Float64, Boolean,
//!   Date32, Timestamp, Utf8).
//! - [`MatrixFormat::Parquet`]: Parquet with the Arrow schema embedded. Exact
//!   numeric types, fast to decode.
//!
//! Both decoders return a batch with every field nullable and no schema
//! metadata, so equivalent data compares equal regardless of format.
//!
//! CSV carries no types, so [`MatrixFormat::decode_with_types`] takes the
//! column types recorded at save time. Columns without a recorded type fall
//! back to inference.

use crate::{Error, Result};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;
use std::sync::Arc;

/// Rows per batch when decoding
const DECODE_BATCH_SIZE: usize = 64 * 1024;

/// Wire encoding for a matrix body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatrixFormat {
    /// Row-oriented, gzip-compressed CSV (default)
    #[default]
    #[serde(rename = "csv")]
    CsvGz,
    /// Column-oriented Parquet
    #[serde(rename = "parquet")]
    Parquet,
}

impl MatrixFormat {
    /// Get format name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CsvGz => "csv",
            Self::Parquet => "parquet",
        }
    }

    /// File suffix appended to the matrix uuid
    #[must_use]
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::CsvGz => ".csv.gz",
            Self::Parquet => ".parquet",
        }
    }

    /// Encode a batch (index, features, label) into a body
    ///
    /// # Errors
    /// Returns `Format` if the writer rejects the batch
    pub fn encode(&self, batch: &RecordBatch) -> Result<Vec<u8>> {
        match self {
            Self::CsvGz => encode_csv_gz(batch),
            Self::Parquet => encode_parquet(batch),
        }
    }

    /// Decode a body into a single batch
    ///
    /// # Errors
    /// Returns `Format` if the bytes do not parse as this format
    pub fn decode(&self, bytes: &[u8]) -> Result<RecordBatch> {
        self.decode_with_types(bytes, &BTreeMap::new())
    }

    /// Decode a body, reading CSV columns as the given Arrow types.
    ///
    /// Parquet bodies embed their schema and ignore `column_types`.
    ///
    /// # Errors
    /// Returns `Format` if the bytes do not parse as this format or a value
    /// does not parse as its recorded type
    pub fn decode_with_types(
        &self,
        bytes: &[u8],
        column_types: &BTreeMap<String, DataType>,
    ) -> Result<RecordBatch> {
        let batch = match self {
            Self::CsvGz => decode_csv_gz(bytes, column_types)?,
            Self::Parquet => decode_parquet(bytes)?,
        };
        normalize(&batch)
    }
}

impl fmt::Display for MatrixFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatrixFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" | "csv.gz" => Ok(Self::CsvGz),
            "parquet" => Ok(Self::Parquet),
            other => Err(Error::Validation(format!("Unknown matrix format '{other}'"))),
        }
    }
}

fn encode_csv_gz(batch: &RecordBatch) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut writer = arrow::csv::WriterBuilder::new()
        .with_header(true)
        .build(encoder);
    writer
        .write(batch)
        .map_err(|e| Error::Format(format!("Failed to write CSV: {e}")))?;

    writer
        .into_inner()
        .finish()
        .map_err(|e| Error::Format(format!("Failed to finish gzip stream: {e}")))
}

fn decode_csv_gz(bytes: &[u8], column_types: &BTreeMap<String, DataType>) -> Result<RecordBatch> {
    use arrow::csv::reader::Format;
    use flate2::read::GzDecoder;

    let mut text = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut text)
        .map_err(|e| Error::Format(format!("Failed to decompress gzip body: {e}")))?;

    let format = Format::default().with_header(true);
    let infer = |max_records| {
        format
            .infer_schema(Cursor::new(&text), max_records)
            .map(|(schema, _)| schema)
            .map_err(|e| Error::Format(format!("Failed to infer CSV schema: {e}")))
    };

    // Header only; rows are scanned when some column has no recorded type
    let mut inferred = infer(Some(0))?;
    if !inferred
        .fields()
        .iter()
        .all(|field| column_types.contains_key(field.name()))
    {
        inferred = infer(None)?;
    }

    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|field| {
            let data_type = column_types
                .get(field.name())
                .unwrap_or_else(|| field.data_type());
            Field::new(field.name(), data_type.clone(), true)
        })
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let reader = arrow::csv::ReaderBuilder::new(Arc::clone(&schema))
        .with_format(format)
        .with_batch_size(DECODE_BATCH_SIZE)
        .build(Cursor::new(&text))
        .map_err(|e| Error::Format(format!("Failed to create CSV reader: {e}")))?;

    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Format(format!("Failed to read CSV rows: {e}")))?;
    concat(&schema, &batches)
}

fn encode_parquet(batch: &RecordBatch) -> Result<Vec<u8>> {
    use parquet::arrow::ArrowWriter;

    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), None)
        .map_err(|e| Error::Format(format!("Failed to create Parquet writer: {e}")))?;
    writer
        .write(batch)
        .map_err(|e| Error::Format(format!("Failed to write Parquet: {e}")))?;
    writer
        .into_inner()
        .map_err(|e| Error::Format(format!("Failed to finish Parquet file: {e}")))
}

fn decode_parquet(bytes: &[u8]) -> Result<RecordBatch> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes::Bytes::copy_from_slice(bytes))
        .map_err(|e| Error::Format(format!("Failed to parse Parquet file: {e}")))?;
    let schema = Arc::clone(builder.schema());

    let reader = builder
        .with_batch_size(DECODE_BATCH_SIZE)
        .build()
        .map_err(|e| Error::Format(format!("Failed to create Parquet reader: {e}")))?;

    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Format(format!("Failed to read record batch: {e}")))?;
    concat(&schema, &batches)
}

fn concat(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<RecordBatch> {
    concat_batches(schema, batches)
        .map_err(|e| Error::Format(format!("Failed to assemble matrix: {e}")))
}

/// Drop schema metadata and mark every field nullable.
fn normalize(batch: &RecordBatch) -> Result<RecordBatch> {
    let fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|field| Field::new(field.name(), field.data_type().clone(), true))
        .collect();
    Ok(RecordBatch::try_new(
        Arc::new(Schema::new(fields)),
        batch.columns().to_vec(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Date32Array, Float64Array, Int32Array, Int64Array, StringArray};

    fn batch() -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("entity_id", DataType::Int64, false),
            Field::new("as_of_date", DataType::Date32, false),
            Field::new("k_feature", DataType::Float64, false),
            Field::new("label", DataType::Int64, false),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                // 2016-01-01, 2017-01-01
                Arc::new(Date32Array::from(vec![16801, 17167])),
                Arc::new(Float64Array::from(vec![0.1, 1.0 / 3.0])),
                Arc::new(Int64Array::from(vec![0, 1])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_formats_decode_equal() {
        let csv = MatrixFormat::CsvGz.decode(&MatrixFormat::CsvGz.encode(&batch()).unwrap()).unwrap();
        let parquet =
            MatrixFormat::Parquet.decode(&MatrixFormat::Parquet.encode(&batch()).unwrap()).unwrap();

        assert_eq!(csv, parquet);
        assert_eq!(csv, normalize(&batch()).unwrap());
    }

    #[test]
    fn test_csv_body_is_gzip() {
        let body = MatrixFormat::CsvGz.encode(&batch()).unwrap();
        assert_eq!(&body[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_decode_wrong_format() {
        let parquet = MatrixFormat::Parquet.encode(&batch()).unwrap();
        let csv = MatrixFormat::CsvGz.encode(&batch()).unwrap();

        assert!(MatrixFormat::CsvGz.decode(&parquet).unwrap_err().is_format());
        assert!(MatrixFormat::Parquet.decode(&csv).unwrap_err().is_format());
        assert!(MatrixFormat::Parquet.decode(b"").unwrap_err().is_format());
    }

    #[test]
    fn test_empty_matrix_keeps_columns() {
        let empty = batch().slice(0, 0);
        let decoded =
            MatrixFormat::Parquet.decode(&MatrixFormat::Parquet.encode(&empty).unwrap()).unwrap();

        assert_eq!(decoded.num_rows(), 0);
        assert_eq!(decoded.num_columns(), 4);
    }

    #[test]
    fn test_format_names() {
        assert_eq!("csv".parse::<MatrixFormat>().unwrap(), MatrixFormat::CsvGz);
        assert_eq!("PARQUET".parse::<MatrixFormat>().unwrap(), MatrixFormat::Parquet);
        assert!("h5".parse::<MatrixFormat>().unwrap_err().is_validation());
        assert_eq!(MatrixFormat::default().to_string(), "csv");
        assert_eq!(MatrixFormat::Parquet.suffix(), ".parquet");
    }

    fn typed_batch() -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("entity_id", DataType::Utf8, true),
            Field::new("as_of_date", DataType::Utf8, true),
            Field::new("visits", DataType::Int32, true),
            Field::new("k_feature", DataType::Float64, true),
            Field::new("label", DataType::Int64, true),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(StringArray::from(vec!["00123", "00456"])),
                Arc::new(StringArray::from(vec!["2016-01-01", "2017-01-01"])),
                Arc::new(Int32Array::from(vec![3, 7])),
                Arc::new(Float64Array::from(vec![0.5, 0.4])),
                Arc::new(Int64Array::from(vec![0, 1])),
            ],
        )
        .unwrap()
    }

    fn types_of(batch: &RecordBatch) -> BTreeMap<String, DataType> {
        batch
            .schema()
            .fields()
            .iter()
            .map(|field| (field.name().clone(), field.data_type().clone()))
            .collect()
    }

    #[test]
    fn test_csv_decode_with_recorded_types() {
        let batch = typed_batch();
        let body = MatrixFormat::CsvGz.encode(&batch).unwrap();

        let decoded = MatrixFormat::CsvGz
            .decode_with_types(&body, &types_of(&batch))
            .unwrap();

        assert_eq!(decoded, batch);
        let ids = decoded.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(ids.value(0), "00123");
    }

    #[test]
    fn test_csv_decode_without_types_infers() {
        let body = MatrixFormat::CsvGz.encode(&typed_batch()).unwrap();

        let decoded = MatrixFormat::CsvGz.decode(&body).unwrap();

        assert_eq!(decoded.schema().field(0).data_type(), &DataType::Int64);
        assert_eq!(decoded.schema().field(1).data_type(), &DataType::Date32);
    }

    #[test]
    fn test_csv_decode_partial_types_infers_the_rest() {
        let batch = typed_batch();
        let body = MatrixFormat::CsvGz.encode(&batch).unwrap();
        let mut types = types_of(&batch);
        types.remove("visits");

        let decoded = MatrixFormat::CsvGz.decode_with_types(&body, &types).unwrap();

        assert_eq!(decoded.schema().field(0).data_type(), &DataType::Utf8);
        assert_eq!(decoded.schema().field(2).data_type(), &DataType::Int64);
    }

    #[test]
    fn test_empty_csv_keeps_recorded_types() {
        let empty = typed_batch().slice(0, 0);
        let body = MatrixFormat::CsvGz.encode(&empty).unwrap();

        let decoded = MatrixFormat::CsvGz
            .decode_with_types(&body, &types_of(&empty))
            .unwrap();

        assert_eq!(decoded.num_rows(), 0);
        assert_eq!(decoded.schema(), empty.schema());
    }

    #[test]
    fn test_csv_value_not_matching_recorded_type() {
        let body = MatrixFormat::CsvGz.encode(&typed_batch()).unwrap();
        let mut types = types_of(&typed_batch());
        types.insert("as_of_date".to_string(), DataType::Int64);

        let err = MatrixFormat::CsvGz.decode_with_types(&body, &types).unwrap_err();
        assert!(err.is_format());
    }
}
