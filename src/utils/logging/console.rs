//! Console output utilities
//!
//! This module provides utilities for formatted console output.

use arrow::array::Array;
use arrow::util::display::{ArrayFormatter, FormatOptions};

use crate::models::{KeyedTable, SUBJECT_KEY};

/// Print summary information about an assembled table
pub fn print_table_summary(table: &KeyedTable, elapsed: std::time::Duration) {
    println!("Assembled table in {elapsed:?}");
    println!("Total rows: {}", table.num_rows());
    println!("Distinct subjects: {}", table.key_set().len());
    println!("Data columns: {}", table.num_columns());
}

/// Print the key column and every data column with its type and null count
pub fn print_schema_info(table: &KeyedTable) {
    println!("Schema:");
    println!("  - {SUBJECT_KEY} (key)");
    let schema = table.schema();
    for (field, column) in schema.fields().iter().zip(table.data().columns()) {
        println!(
            "  - {} ({}, {} null)",
            field.name(),
            field.data_type(),
            column.null_count()
        );
    }
}

/// Print the first rows of a table
pub fn print_sample_rows(table: &KeyedTable, num_rows: usize) {
    let options = FormatOptions::default().with_null("NULL");
    let formatters: Vec<_> = table
        .data()
        .columns()
        .iter()
        .map(|c| ArrayFormatter::try_new(c.as_ref(), &options))
        .collect();
    let schema = table.schema();

    println!("First {num_rows} rows:");
    for row in 0..num_rows.min(table.num_rows()) {
        let cells: Vec<String> = schema
            .fields()
            .iter()
            .zip(&formatters)
            .map(|(field, formatter)| match formatter {
                Ok(f) => format!("{}: {}", field.name(), f.value(row)),
                Err(_) => format!("{}: ?", field.name()),
            })
            .collect();
        println!("{SUBJECT_KEY} {}: [{}]", table.key_values()[row], cells.join(", "));
    }
}
