//! Tables keyed by subject identifier
//!
//! A [`KeyedTable`] keeps the subject key apart from its data columns, so the key
//! can never be mistaken for (or collide with) a survey variable. The key is
//! written out as an explicit `SEQN` column only when the table leaves memory.

use std::ops::Deref;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use rustc_hash::FxHashSet;

/// Name of the subject identifier column
pub const SUBJECT_KEY: &str = "SEQN";

/// Why a column could not serve as the subject key
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KeyConversionError {
    #[error("Subject key is missing at row {row}")]
    Null { row: usize },
    #[error("Subject key {value} at row {row} is not representable as a 64-bit integer")]
    OutOfRange { row: usize, value: String },
    #[error("Subject key column has unsupported type {0}")]
    UnsupportedType(DataType),
}

/// Convert a key column into non-null 64-bit integers
///
/// Float keys (as decoded from SAS transport files) must be integral and in range.
pub fn key_array(array: &ArrayRef) -> std::result::Result<Int64Array, KeyConversionError> {
    if let Some(row) = (0..array.len()).find(|&i| array.is_null(i)) {
        return Err(KeyConversionError::Null { row });
    }

    match array.data_type() {
        DataType::Int64 => {
            let ints = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| KeyConversionError::UnsupportedType(DataType::Int64))?;
            Ok(Int64Array::from(ints.values().to_vec()))
        }
        DataType::Int32 | DataType::Int16 | DataType::Int8 | DataType::UInt32
        | DataType::UInt16 | DataType::UInt8 => {
            let cast = arrow::compute::cast(array, &DataType::Int64)
                .map_err(|_| KeyConversionError::UnsupportedType(array.data_type().clone()))?;
            key_array(&cast)
        }
        DataType::Float64 => {
            let floats = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| KeyConversionError::UnsupportedType(DataType::Float64))?;
            let keys = floats
                .values()
                .iter()
                .enumerate()
                .map(|(row, &v)| float_to_key(v).ok_or_else(|| KeyConversionError::OutOfRange {
                    row,
                    value: v.to_string(),
                }))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Int64Array::from(keys))
        }
        other => Err(KeyConversionError::UnsupportedType(other.clone())),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_key(v: f64) -> Option<i64> {
    // 2^63 is exactly representable, i64::MAX is not
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if v.is_finite() && v.fract() == 0.0 && v >= -LIMIT && v < LIMIT {
        Some(v as i64)
    } else {
        None
    }
}

/// Build a record batch that may have no columns but still carries a row count
pub(crate) fn batch_with_rows(
    fields: Vec<Field>,
    columns: Vec<ArrayRef>,
    num_rows: usize,
) -> std::result::Result<RecordBatch, ArrowError> {
    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)
}

/// A table whose rows are identified by subject key
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedTable {
    keys: Int64Array,
    data: RecordBatch,
}

impl KeyedTable {
    /// Pair a key array with data columns
    ///
    /// # Errors
    /// Fails if the lengths differ, a key is null, or the data repeats the key column.
    pub fn try_new(keys: Int64Array, data: RecordBatch) -> std::result::Result<Self, ArrowError> {
        if keys.len() != data.num_rows() {
            return Err(ArrowError::InvalidArgumentError(format!(
                "Key length {} does not match row count {}",
                keys.len(),
                data.num_rows()
            )));
        }
        if keys.null_count() > 0 {
            return Err(ArrowError::InvalidArgumentError(
                "Subject keys must not be null".to_string(),
            ));
        }
        if data.schema().index_of(SUBJECT_KEY).is_ok() {
            return Err(ArrowError::InvalidArgumentError(format!(
                "{SUBJECT_KEY} must be the table key, not a data column"
            )));
        }
        Ok(Self { keys, data })
    }

    /// Table with no rows and no columns
    #[must_use]
    pub fn empty() -> Self {
        Self {
            keys: Int64Array::from(Vec::<i64>::new()),
            data: RecordBatch::new_empty(Arc::new(Schema::empty())),
        }
    }

    /// Split a record batch into key and data, taking `SEQN` as the key
    ///
    /// Returns `Ok(None)` when the batch has no `SEQN` column.
    pub fn from_record_batch(
        batch: &RecordBatch,
    ) -> std::result::Result<Option<Self>, KeyConversionError> {
        let Ok(key_idx) = batch.schema().index_of(SUBJECT_KEY) else {
            return Ok(None);
        };
        let keys = key_array(batch.column(key_idx))?;

        let mut data = batch.clone();
        data.remove_column(key_idx);
        Ok(Some(Self { keys, data }))
    }

    /// Record batch with the key restored as the leading `SEQN` column
    pub fn to_record_batch(&self) -> std::result::Result<RecordBatch, ArrowError> {
        let mut fields = vec![Field::new(SUBJECT_KEY, DataType::Int64, false)];
        fields.extend(self.data.schema().fields().iter().map(|f| f.as_ref().clone()));

        let mut columns: Vec<ArrayRef> = vec![Arc::new(self.keys.clone())];
        columns.extend(self.data.columns().iter().cloned());

        batch_with_rows(fields, columns, self.num_rows())
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.keys.len()
    }

    /// Number of data columns (the key is not counted)
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.data.num_columns()
    }

    #[must_use]
    pub const fn keys(&self) -> &Int64Array {
        &self.keys
    }

    #[must_use]
    pub fn key_values(&self) -> &[i64] {
        self.keys.values()
    }

    #[must_use]
    pub const fn data(&self) -> &RecordBatch {
        &self.data
    }

    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.data.schema()
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.data
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.data.column_by_name(name)
    }

    /// First key that occurs more than once, in row order
    #[must_use]
    pub fn first_duplicate_key(&self) -> Option<i64> {
        let mut seen = FxHashSet::default();
        self.key_values().iter().copied().find(|k| !seen.insert(*k))
    }

    #[must_use]
    pub fn has_unique_keys(&self) -> bool {
        self.first_duplicate_key().is_none()
    }

    /// Distinct keys of the table
    #[must_use]
    pub fn key_set(&self) -> FxHashSet<i64> {
        self.key_values().iter().copied().collect()
    }
}

impl AsRef<Self> for KeyedTable {
    fn as_ref(&self) -> &Self {
        self
    }
}

macro_rules! keyed_table_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name(KeyedTable);

        impl $name {
            #[must_use]
            pub const fn new(table: KeyedTable) -> Self {
                Self(table)
            }

            #[must_use]
            pub const fn table(&self) -> &KeyedTable {
                &self.0
            }

            #[must_use]
            pub fn into_table(self) -> KeyedTable {
                self.0
            }
        }

        impl Deref for $name {
            type Target = KeyedTable;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<KeyedTable> for $name {
            fn from(table: KeyedTable) -> Self {
                Self(table)
            }
        }

        impl From<$name> for KeyedTable {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<KeyedTable> for $name {
            fn as_ref(&self) -> &KeyedTable {
                &self.0
            }
        }
    };
}

keyed_table_newtype!(
    /// One topical questionnaire or lab table, or an assembly of several
    Codebook
);

keyed_table_newtype!(
    /// Follow-up mortality status; keys may repeat
    Mortality
);
