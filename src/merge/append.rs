//! Row-wise union of tables across waves

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int64Array, new_null_array};
use arrow::compute::{cast, concat};
use arrow::datatypes::{DataType, Field};
use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::MergeError;
use crate::models::table::batch_with_rows;
use crate::models::{Codebook, KeyedTable, Mortality};

type Result<T> = std::result::Result<T, MergeError>;

/// Keep only the first occurrence of each column name
///
/// Some published tables repeat a variable; a repeated name would make the
/// row-wise union ambiguous.
pub fn drop_duplicate_columns(table: &KeyedTable) -> Result<KeyedTable> {
    let schema = table.schema();
    let mut seen = FxHashSet::default();
    let keep: Vec<usize> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| seen.insert(f.name().clone()))
        .map(|(i, _)| i)
        .collect();

    if keep.len() == schema.fields().len() {
        return Ok(table.clone());
    }

    let data = table.data().project(&keep)?;
    Ok(KeyedTable::try_new(table.keys().clone(), data)?)
}

/// Common type for a column whose type differs between tables
#[must_use]
pub fn unify_types(a: &DataType, b: &DataType) -> DataType {
    match (a, b) {
        _ if a == b => a.clone(),
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        _ if a.is_numeric() && b.is_numeric() => DataType::Float64,
        _ => DataType::Utf8,
    }
}

/// Row-wise union of keyed tables
///
/// The output schema is the union of column names in first-seen order. Keys
/// are concatenated as they are; the same key may appear in several inputs.
pub fn append_tables(tables: &[&KeyedTable]) -> Result<KeyedTable> {
    if tables.is_empty() {
        return Ok(KeyedTable::empty());
    }

    let deduped: Vec<KeyedTable> = tables
        .iter()
        .map(|t| drop_duplicate_columns(t))
        .collect::<Result<_>>()?;

    let mut names: Vec<String> = Vec::new();
    let mut types: FxHashMap<String, DataType> = FxHashMap::default();
    for table in &deduped {
        for field in table.schema().fields() {
            match types.get_mut(field.name()) {
                Some(existing) => *existing = unify_types(existing, field.data_type()),
                None => {
                    names.push(field.name().clone());
                    types.insert(field.name().clone(), field.data_type().clone());
                }
            }
        }
    }

    let num_rows = deduped.iter().map(KeyedTable::num_rows).sum();
    let mut fields = Vec::with_capacity(names.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(names.len());

    for name in names {
        let data_type = types.remove(&name).unwrap_or(DataType::Null);
        let parts = deduped
            .iter()
            .map(|table| match table.column(&name) {
                Some(col) if col.data_type() == &data_type => Ok(Arc::clone(col)),
                Some(col) => cast(col.as_ref(), &data_type),
                None => Ok(new_null_array(&data_type, table.num_rows())),
            })
            .collect::<std::result::Result<Vec<ArrayRef>, _>>()?;
        let refs = parts.iter().map(|a| a.as_ref() as &dyn Array).collect_vec();

        columns.push(concat(&refs)?);
        fields.push(Field::new(name, data_type, true));
    }

    let keys: Int64Array = deduped
        .iter()
        .flat_map(|t| t.key_values().iter().copied())
        .collect::<Vec<i64>>()
        .into();

    let data = batch_with_rows(fields, columns, num_rows)?;
    Ok(KeyedTable::try_new(keys, data)?)
}

/// Append codebooks of several waves
pub fn append_codebooks(codebooks: &[Codebook]) -> Result<Codebook> {
    let tables = codebooks.iter().map(Codebook::table).collect_vec();
    append_tables(&tables).map(Codebook::new)
}

/// Append mortality tables of several waves
pub fn append_mortalities(mortalities: &[Mortality]) -> Result<Mortality> {
    let tables = mortalities.iter().map(Mortality::table).collect_vec();
    append_tables(&tables).map(Mortality::new)
}
