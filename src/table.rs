//! Tabular (Arrow) view of a record collection
//!
//! Column types are inferred from the non-null cells:
//! - all booleans → `Boolean`
//! - all integers → `Int64`
//! - integers and floats → `Float64`
//! - anything else → `Utf8` (lists, maps and artifacts rendered as JSON text)
//!
//! Missing cells are nulls. The batch can be written to Parquet with
//! [`write_parquet`] when the `parquet` feature is enabled.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};

use crate::collection::RecordSet;
use crate::value::Value;
use crate::Result;

fn infer_type<'a>(cells: impl Iterator<Item = Option<&'a Value>>) -> DataType {
    let mut inferred: Option<DataType> = None;
    for value in cells.flatten() {
        let kind = match value {
            Value::Null => continue,
            Value::Bool(_) => DataType::Boolean,
            Value::Int(_) => DataType::Int64,
            Value::Float(_) => DataType::Float64,
            _ => return DataType::Utf8,
        };
        inferred = Some(match (inferred, kind) {
            (None, kind) => kind,
            (Some(a), b) if a == b => a,
            (Some(DataType::Int64 | DataType::Float64), DataType::Int64 | DataType::Float64) => {
                DataType::Float64
            }
            _ => return DataType::Utf8,
        });
    }
    inferred.unwrap_or(DataType::Utf8)
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Str(s) => Some(s.clone()),
        Value::List(_) | Value::Map(_) | Value::Artifact(_) => Some(value.to_json().to_string()),
        other => Some(other.to_string()),
    }
}

fn build_column(rows: &[BTreeMap<String, Value>], key: &str, data_type: &DataType) -> ArrayRef {
    let cells = rows.iter().map(|row| row.get(key));
    match data_type {
        DataType::Boolean => Arc::new(
            cells
                .map(|v| v.and_then(Value::as_bool))
                .collect::<BooleanArray>(),
        ),
        DataType::Int64 => Arc::new(cells.map(|v| v.and_then(Value::as_i64)).collect::<Int64Array>()),
        DataType::Float64 => Arc::new(
            cells
                .map(|v| v.and_then(Value::as_f64))
                .collect::<Float64Array>(),
        ),
        _ => Arc::new(cells.map(|v| v.and_then(text)).collect::<StringArray>()),
    }
}

/// Convert a collection to an Arrow batch.
///
/// With `lazy` set, pending fields appear as their markers and nothing is read
/// from disk; otherwise every row is materialized (and freed afterwards).
///
/// # Errors
///
/// Returns a load error for non-lazy conversion, or an Arrow error.
pub fn to_record_batch(records: &RecordSet, lazy: bool) -> Result<RecordBatch> {
    let rows: Vec<BTreeMap<String, Value>> = if lazy {
        records.flattened()
    } else {
        records
            .iter()
            .map(|record| {
                let fields = record.materialize()?;
                record.free_unused();
                Ok(fields)
            })
            .collect::<Result<_>>()?
    };
    let keys = records.keys();

    let mut fields = Vec::with_capacity(keys.len());
    let mut columns = Vec::with_capacity(keys.len());
    for key in &keys {
        let data_type = infer_type(rows.iter().map(|row| row.get(key)));
        columns.push(build_column(&rows, key, &data_type));
        fields.push(Field::new(key, data_type, true));
    }

    let schema = Arc::new(Schema::new(fields));
    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}

/// Write a batch to a Parquet file.
///
/// # Errors
///
/// Returns [`Error::Storage`](crate::Error::Storage) if the file cannot be
/// created or encoded.
#[cfg(feature = "parquet")]
pub fn write_parquet(batch: &RecordBatch, path: impl AsRef<std::path::Path>) -> Result<()> {
    use parquet::arrow::ArrowWriter;
    use std::fs::File;

    use crate::Error;

    let path = path.as_ref();
    let file = File::create(path).map_err(|e| {
        Error::Storage(format!("Failed to create Parquet file {}: {e}", path.display()))
    })?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .map_err(|e| Error::Storage(format!("Failed to create Parquet writer: {e}")))?;
    writer
        .write(batch)
        .map_err(|e| Error::Storage(format!("Failed to write record batch: {e}")))?;
    writer
        .close()
        .map_err(|e| Error::Storage(format!("Failed to finish Parquet file: {e}")))?;
    tracing::debug!(path = %path.display(), rows = batch.num_rows(), "wrote parquet table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use arrow::array::Array;

    fn records() -> RecordSet {
        RecordSet::new(vec![
            Record::new([
                ("config.seed", Value::Int(0)),
                ("config.lr", Value::Int(1)),
                ("info.ok", Value::Bool(true)),
                ("train.loss", Value::from(vec![1.0, 0.5])),
            ]),
            Record::new([
                ("config.seed", Value::Int(1)),
                ("config.lr", Value::Float(0.5)),
                ("info.ok", Value::Null),
            ]),
        ])
    }

    #[test]
    fn test_inferred_schema() {
        let batch = to_record_batch(&records(), true).unwrap();
        let schema = batch.schema();
        let type_of = |name: &str| schema.field_with_name(name).unwrap().data_type().clone();
        assert_eq!(type_of("config.seed"), DataType::Int64);
        assert_eq!(type_of("config.lr"), DataType::Float64);
        assert_eq!(type_of("info.ok"), DataType::Boolean);
        assert_eq!(type_of("train.loss"), DataType::Utf8);
        assert_eq!(batch.num_rows(), 2);
    }

    #[test]
    fn test_missing_cells_are_null() {
        let batch = to_record_batch(&records(), true).unwrap();
        let loss = batch.column_by_name("train.loss").unwrap();
        assert!(loss.is_null(1));
        let loss = loss.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(loss.value(0), "[1.0,0.5]");
    }

    #[test]
    fn test_empty_collection() {
        let batch = to_record_batch(&RecordSet::default(), false).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 0);
    }

    #[cfg(feature = "parquet")]
    #[test]
    fn test_write_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.parquet");
        let batch = to_record_batch(&records(), true).unwrap();
        write_parquet(&batch, &path).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }
}
