//! Linked mortality fixed-width records

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Builder, Int64Array};
use arrow::datatypes::{DataType, Field};

use crate::models::table::{KeyedTable, batch_with_rows};

/// One-based, inclusive byte ranges of the mortality record fields
pub const MORTALITY_COLUMN_SPECS: [(usize, usize); 12] = [
    (1, 14),
    (15, 15),
    (16, 16),
    (17, 19),
    (20, 20),
    (21, 21),
    (22, 22),
    (23, 26),
    (27, 34),
    (35, 42),
    (43, 45),
    (46, 48),
];

/// Field names, in record order
pub const MORTALITY_COLUMNS: [&str; 12] = [
    "PUBLICID",
    "ELIGSTAT",
    "MORTSTAT",
    "UCOD_LEADING",
    "DIABETES",
    "HYPERTEN",
    "DODQTR",
    "DODYEAR",
    "WGT_NEW",
    "SA_WGT_NEW",
    "PERMTH_INT",
    "PERMTH_EXM",
];

/// Administrative fields left out of the result
pub const MORTALITY_DROPPED: [&str; 5] = ["PUBLICID", "DODQTR", "DODYEAR", "WGT_NEW", "SA_WGT_NEW"];

/// Field holding the subject identifier
pub const MORTALITY_ID_FIELD: &str = "PUBLICID";

/// Field widths derived from [`MORTALITY_COLUMN_SPECS`]
#[must_use]
pub fn mortality_widths() -> [usize; 12] {
    MORTALITY_COLUMN_SPECS.map(|(start, end)| end - (start - 1))
}

/// Fields kept in the decoded table, in record order
pub fn mortality_retained_columns() -> impl Iterator<Item = &'static str> {
    MORTALITY_COLUMNS
        .into_iter()
        .filter(|c| !MORTALITY_DROPPED.contains(c))
}

/// Result of decoding a mortality file
#[derive(Debug)]
pub struct MortalityRecords {
    pub table: KeyedTable,
    /// Lines whose identifier field was not an integer
    pub skipped_lines: Vec<usize>,
}

/// Slice a field out of a record; short lines yield an empty field
fn field(line: &[u8], (start, end): (usize, usize)) -> &str {
    let from = (start - 1).min(line.len());
    let to = end.min(line.len());
    std::str::from_utf8(&line[from..to]).map_or("", str::trim)
}

/// Decode a fixed-width mortality payload
///
/// Every non-blank line is a record. Retained fields are coerced to `Float64`;
/// values that do not parse become null. The identifier field becomes the key
/// and lines without an integer identifier are skipped.
pub fn read_mortality(bytes: &[u8]) -> std::result::Result<MortalityRecords, arrow::error::ArrowError> {
    let retained: Vec<(usize, &str)> = MORTALITY_COLUMNS
        .iter()
        .enumerate()
        .filter(|(_, name)| !MORTALITY_DROPPED.contains(name))
        .map(|(i, name)| (i, *name))
        .collect();
    let id_idx = MORTALITY_COLUMNS
        .iter()
        .position(|c| *c == MORTALITY_ID_FIELD)
        .unwrap_or(0);

    let mut keys = Vec::new();
    let mut builders: Vec<Float64Builder> = retained.iter().map(|_| Float64Builder::new()).collect();
    let mut skipped_lines = Vec::new();

    for (line_no, line) in bytes.split(|&b| b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let Ok(key) = field(line, MORTALITY_COLUMN_SPECS[id_idx]).parse::<i64>() else {
            skipped_lines.push(line_no + 1);
            continue;
        };
        keys.push(key);

        for ((idx, _), builder) in retained.iter().zip(builders.iter_mut()) {
            builder.append_option(field(line, MORTALITY_COLUMN_SPECS[*idx]).parse::<f64>().ok());
        }
    }

    let fields = retained
        .iter()
        .map(|(_, name)| Field::new(*name, DataType::Float64, true))
        .collect();
    let columns = builders
        .iter_mut()
        .map(|b| Arc::new(b.finish()) as ArrayRef)
        .collect();
    let data = batch_with_rows(fields, columns, keys.len())?;
    let table = KeyedTable::try_new(Int64Array::from(keys), data)?;

    Ok(MortalityRecords {
        table,
        skipped_lines,
    })
}
