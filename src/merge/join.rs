//! Column-wise outer joins on the subject key

use arrow::array::{ArrayRef, Int64Array, UInt32Array};
use arrow::compute::take;
use arrow::datatypes::Field;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::config::ColumnCollision;
use crate::error::MergeError;
use crate::models::table::batch_with_rows;
use crate::models::{Codebook, KeyedTable, Mortality};
use crate::utils::logging::log_warning;

type Result<T> = std::result::Result<T, MergeError>;

/// A data column chosen for the output: `(table, column)` plus its field
struct PlannedColumn {
    table: usize,
    column: usize,
    field: Field,
}

/// Pick output columns in input order, applying the collision policy
fn plan_columns(tables: &[&KeyedTable], collision: ColumnCollision) -> Result<Vec<PlannedColumn>> {
    let mut seen = FxHashSet::default();
    let mut planned = Vec::new();

    for (t, table) in tables.iter().enumerate() {
        let mut own = FxHashSet::default();
        for (c, field) in table.schema().fields().iter().enumerate() {
            // A name repeated inside one table keeps its first occurrence
            if !own.insert(field.name().clone()) {
                log_warning("Dropping repeated column", Some(field.name()));
                continue;
            }
            if !seen.insert(field.name().clone()) {
                match collision {
                    ColumnCollision::Reject => {
                        return Err(MergeError::ColumnCollision {
                            column: field.name().clone(),
                        });
                    }
                    ColumnCollision::KeepFirst => {
                        log_warning("Dropping colliding column", Some(field.name()));
                        continue;
                    }
                }
            }
            planned.push(PlannedColumn {
                table: t,
                column: c,
                field: field.as_ref().clone().with_nullable(true),
            });
        }
    }

    Ok(planned)
}

/// Gather the planned columns through per-table row selections
fn assemble(
    tables: &[&KeyedTable],
    planned: Vec<PlannedColumn>,
    selections: &[UInt32Array],
    keys: Vec<i64>,
) -> Result<KeyedTable> {
    let num_rows = keys.len();
    let mut fields = Vec::with_capacity(planned.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(planned.len());

    for plan in planned {
        let source = tables[plan.table].data().column(plan.column);
        columns.push(take(source.as_ref(), &selections[plan.table], None)?);
        fields.push(plan.field);
    }

    let data = batch_with_rows(fields, columns, num_rows)?;
    Ok(KeyedTable::try_new(Int64Array::from(keys), data)?)
}

/// Outer join of several codebooks from one wave
///
/// Every input must have unique keys. The result holds the union of all keys in
/// ascending order; cells of a codebook that does not cover a key are null.
/// Column name collisions are an error.
pub fn join_codebooks(codebooks: &[Codebook]) -> Result<Codebook> {
    join_codebooks_with(codebooks, ColumnCollision::Reject)
}

/// [`join_codebooks`] with an explicit collision policy
pub fn join_codebooks_with(codebooks: &[Codebook], collision: ColumnCollision) -> Result<Codebook> {
    let tables: Vec<&KeyedTable> = codebooks.iter().map(Codebook::table).collect();
    if tables.is_empty() {
        return Ok(Codebook::new(KeyedTable::empty()));
    }

    let planned = plan_columns(&tables, collision)?;

    let indexes = tables
        .par_iter()
        .enumerate()
        .map(|(t, table)| {
            let mut index = FxHashMap::default();
            index.reserve(table.num_rows());
            for (row, &key) in table.key_values().iter().enumerate() {
                if index.insert(key, row_index(row)?).is_some() {
                    return Err(MergeError::DuplicateKey { table: t, key });
                }
            }
            Ok(index)
        })
        .collect::<Result<Vec<FxHashMap<i64, u32>>>>()?;

    let mut keys: Vec<i64> = tables
        .iter()
        .flat_map(|t| t.key_values().iter().copied())
        .collect();
    keys.sort_unstable();
    keys.dedup();

    let selections: Vec<UInt32Array> = indexes
        .par_iter()
        .map(|index| keys.iter().map(|k| index.get(k).copied()).collect::<UInt32Array>())
        .collect();

    assemble(&tables, planned, &selections, keys).map(Codebook::new)
}

fn row_index(row: usize) -> Result<u32> {
    u32::try_from(row).map_err(|_| {
        MergeError::Arrow(arrow::error::ArrowError::InvalidArgumentError(format!(
            "Row {row} exceeds the supported table size"
        )))
    })
}

fn group_rows(table: &KeyedTable) -> Result<FxHashMap<i64, SmallVec<[u32; 1]>>> {
    let mut groups: FxHashMap<i64, SmallVec<[u32; 1]>> = FxHashMap::default();
    for (row, &key) in table.key_values().iter().enumerate() {
        groups.entry(key).or_default().push(row_index(row)?);
    }
    Ok(groups)
}

/// Full outer join of two keyed tables
///
/// Keys may repeat on either side; each matching pair of rows yields one output
/// row. Rows without a partner keep nulls for the other side's columns.
pub fn outer_join(
    left: &KeyedTable,
    right: &KeyedTable,
    collision: ColumnCollision,
) -> Result<KeyedTable> {
    let tables = [left, right];
    let planned = plan_columns(&tables, collision)?;

    let left_rows = group_rows(left)?;
    let right_rows = group_rows(right)?;

    let mut union: Vec<i64> = left_rows.keys().chain(right_rows.keys()).copied().collect();
    union.sort_unstable();
    union.dedup();

    let empty = SmallVec::<[u32; 1]>::new();
    let mut keys = Vec::with_capacity(union.len());
    let mut left_sel: Vec<Option<u32>> = Vec::with_capacity(union.len());
    let mut right_sel: Vec<Option<u32>> = Vec::with_capacity(union.len());

    for key in union {
        let l = left_rows.get(&key).unwrap_or(&empty);
        let r = right_rows.get(&key).unwrap_or(&empty);

        match (l.is_empty(), r.is_empty()) {
            (false, false) => {
                for &li in l {
                    for &ri in r {
                        keys.push(key);
                        left_sel.push(Some(li));
                        right_sel.push(Some(ri));
                    }
                }
            }
            (false, true) => {
                for &li in l {
                    keys.push(key);
                    left_sel.push(Some(li));
                    right_sel.push(None);
                }
            }
            (true, false) => {
                for &ri in r {
                    keys.push(key);
                    left_sel.push(None);
                    right_sel.push(Some(ri));
                }
            }
            (true, true) => {}
        }
    }

    let selections = [UInt32Array::from(left_sel), UInt32Array::from(right_sel)];
    assemble(&tables, planned, &selections, keys)
}

/// Link codebook data with mortality follow-up
///
/// This is an outer join: mortality covers subjects that a codebook extract
/// leaves out and the other way round, and both must survive.
pub fn link_codebook_with_mortality(codebook: &Codebook, mortality: &Mortality) -> Result<Codebook> {
    link_codebook_with_mortality_with(codebook, mortality, ColumnCollision::Reject)
}

/// [`link_codebook_with_mortality`] with an explicit collision policy
pub fn link_codebook_with_mortality_with(
    codebook: &Codebook,
    mortality: &Mortality,
    collision: ColumnCollision,
) -> Result<Codebook> {
    outer_join(codebook.table(), mortality.table(), collision).map(Codebook::new)
}
