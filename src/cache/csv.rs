//! CSV snapshots of keyed tables
//!
//! The subject key is written as the first column, `SEQN`. CSV carries no
//! types, so each snapshot has a JSON schema file beside it recording every
//! data column's Arrow type. A snapshot without one (or a column the schema
//! does not name) falls back to inference: integer and all-empty data columns
//! come back as `Float64`, which is how survey values are decoded in the first
//! place.

use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::compute::{cast, concat_batches};
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::models::{KeyedTable, SUBJECT_KEY};

/// One data column as recorded beside a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotColumn {
    pub name: String,
    /// Arrow type in its display form, e.g. `Utf8` or `Float64`
    pub data_type: String,
    pub nullable: bool,
}

/// Column types of a snapshot, in column order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSchema {
    pub columns: Vec<SnapshotColumn>,
}

impl SnapshotSchema {
    #[must_use]
    pub fn of(table: &KeyedTable) -> Self {
        let columns = table
            .schema()
            .fields()
            .iter()
            .map(|f| SnapshotColumn {
                name: f.name().clone(),
                data_type: f.data_type().to_string(),
                nullable: f.is_nullable(),
            })
            .collect();
        Self { columns }
    }

    /// Recorded type of a column, if it is named and its type parses
    fn lookup(&self, name: &str) -> Option<(DataType, bool)> {
        let column = self.columns.iter().find(|c| c.name == name)?;
        DataType::from_str(&column.data_type)
            .ok()
            .map(|dt| (dt, column.nullable))
    }
}

pub fn encode_schema(table: &KeyedTable) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(&SnapshotSchema::of(table))
}

pub fn decode_schema(bytes: &[u8]) -> serde_json::Result<SnapshotSchema> {
    serde_json::from_slice(bytes)
}

/// Encode a table, key column first
pub fn encode_table(table: &KeyedTable) -> Result<Vec<u8>, ArrowError> {
    let batch = table.to_record_batch()?;
    let mut writer = WriterBuilder::new().with_header(true).build(Vec::new());
    writer.write(&batch)?;
    Ok(writer.into_inner())
}

/// Type an unrecorded column is read back as
fn inferred_type(name: &str, inferred: &DataType) -> DataType {
    if name == SUBJECT_KEY {
        return DataType::Int64;
    }
    match inferred {
        DataType::Null
        | DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => DataType::Float64,
        other => other.clone(),
    }
}

/// Types the CSV reader parses directly; anything else is read as text and cast
fn parsed_directly(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Null
            | DataType::Boolean
            | DataType::Utf8
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Decode a snapshot into a record batch with the key still a plain column
///
/// Columns named in `recorded` come back with exactly the recorded type.
pub fn decode_batch(
    bytes: &[u8],
    recorded: Option<&SnapshotSchema>,
) -> Result<RecordBatch, ArrowError> {
    let (inferred, _) = Format::default()
        .with_header(true)
        .infer_schema(Cursor::new(bytes), None)?;

    // (read as, final type) per column
    let plan: Vec<(Field, Field)> = inferred
        .fields()
        .iter()
        .map(|f| {
            let name = f.name();
            let target = match recorded.and_then(|s| s.lookup(name)) {
                Some((data_type, nullable)) if name != SUBJECT_KEY => {
                    Field::new(name, data_type, nullable)
                }
                _ => Field::new(name, inferred_type(name, f.data_type()), true),
            };
            let read_as = if parsed_directly(target.data_type()) {
                target.clone().with_nullable(true)
            } else {
                Field::new(name, DataType::Utf8, true)
            };
            (read_as, target)
        })
        .collect();

    let read_schema = Arc::new(Schema::new(plan.iter().map(|(r, _)| r.clone()).collect::<Vec<_>>()));
    let reader = ReaderBuilder::new(Arc::clone(&read_schema))
        .with_header(true)
        .build(Cursor::new(bytes))?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    let read = concat_batches(&read_schema, &batches)?;

    let columns = plan
        .iter()
        .zip(read.columns())
        .map(|((read_as, target), column)| {
            if read_as.data_type() == target.data_type() {
                Ok(Arc::clone(column))
            } else {
                cast(column, target.data_type())
            }
        })
        .collect::<Result<Vec<ArrayRef>, _>>()?;
    let schema = Arc::new(Schema::new(plan.into_iter().map(|(_, t)| t).collect::<Vec<_>>()));

    RecordBatch::try_new(schema, columns)
}
