//! SAS transport (XPORT v5) decoding
//!
//! Codebooks are published as SAS transport files: a run of 80-byte header
//! records, one NAMESTR descriptor per variable, then fixed-length observations.
//! Numeric values are IBM-370 hexadecimal floats of 2..=8 bytes.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch;

use crate::models::table::batch_with_rows;

const RECORD_LEN: usize = 80;
const HEADER_PREFIX: &[u8] = b"HEADER RECORD*******";
const LIBRARY_HEADER: &str = "LIBRARY HEADER RECORD";
const MEMBER_HEADER: &str = "MEMBER  HEADER RECORD";
const NAMESTR_HEADER: &str = "NAMESTR HEADER RECORD";
const OBS_HEADER: &str = "OBS     HEADER RECORD";

/// Errors raised while decoding a transport file
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XportError {
    #[error("Transport file ended unexpectedly while reading {0}")]
    Truncated(&'static str),
    #[error("Expected {expected} at byte offset {offset}")]
    MissingHeader { expected: &'static str, offset: usize },
    #[error("Invalid header field: {0}")]
    InvalidHeader(String),
    #[error("Variable {name} has unsupported length {length}")]
    InvalidVariable { name: String, length: usize },
}

type Result<T> = std::result::Result<T, XportError>;

/// Kind of a transport variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Numeric,
    Character,
}

/// Descriptor of one variable (one NAMESTR record)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    pub length: usize,
    pub position: usize,
}

/// Decode the first member of a transport file into a record batch
///
/// Numeric variables become nullable `Float64` columns and character variables
/// nullable `Utf8` columns. Column order follows the file.
pub fn read_xport(bytes: &[u8]) -> Result<RecordBatch> {
    let mut offset = 0;

    expect_header(bytes, offset, LIBRARY_HEADER)?;
    // library header, two real-header records
    offset += 3 * RECORD_LEN;

    expect_header(bytes, offset, MEMBER_HEADER)?;
    let namestr_len = header_number(record(bytes, offset, "member header")?, 74, 78)?;
    if namestr_len != 140 && namestr_len != 136 {
        return Err(XportError::InvalidHeader(format!(
            "NAMESTR length {namestr_len}"
        )));
    }
    // member header, descriptor header, two member data records
    offset += 4 * RECORD_LEN;

    expect_header(bytes, offset, NAMESTR_HEADER)?;
    let num_vars = header_number(record(bytes, offset, "namestr header")?, 54, 58)?;
    offset += RECORD_LEN;

    let mut variables = Vec::with_capacity(num_vars);
    for i in 0..num_vars {
        let start = offset + i * namestr_len;
        let raw = bytes
            .get(start..start + namestr_len)
            .ok_or(XportError::Truncated("variable descriptors"))?;
        variables.push(parse_namestr(raw)?);
    }
    offset += padded(num_vars * namestr_len);

    expect_header(bytes, offset, OBS_HEADER)?;
    offset += RECORD_LEN;

    decode_observations(&variables, &bytes[offset..])
}

fn record<'a>(bytes: &'a [u8], offset: usize, what: &'static str) -> Result<&'a [u8]> {
    bytes
        .get(offset..offset + RECORD_LEN)
        .ok_or(XportError::Truncated(what))
}

fn expect_header(bytes: &[u8], offset: usize, expected: &'static str) -> Result<()> {
    let rec = record(bytes, offset, expected)?;
    let name = &rec[HEADER_PREFIX.len()..HEADER_PREFIX.len() + expected.len()];
    if rec.starts_with(HEADER_PREFIX) && name == expected.as_bytes() {
        Ok(())
    } else {
        Err(XportError::MissingHeader { expected, offset })
    }
}

fn header_number(rec: &[u8], from: usize, to: usize) -> Result<usize> {
    let text = String::from_utf8_lossy(&rec[from..to]);
    text.trim()
        .parse()
        .map_err(|_| XportError::InvalidHeader(text.into_owned()))
}

const fn padded(len: usize) -> usize {
    len.div_ceil(RECORD_LEN) * RECORD_LEN
}

fn be_i16(raw: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([raw[at], raw[at + 1]])
}

fn be_i32(raw: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

fn text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches([' ', '\0'])
        .to_string()
}

fn parse_namestr(raw: &[u8]) -> Result<Variable> {
    let name = text(&raw[8..16]);
    let kind = match be_i16(raw, 0) {
        1 => VariableKind::Numeric,
        2 => VariableKind::Character,
        other => {
            return Err(XportError::InvalidHeader(format!(
                "variable {name} has type {other}"
            )));
        }
    };
    let length = usize::try_from(be_i16(raw, 4)).unwrap_or(0);
    let position = usize::try_from(be_i32(raw, 84))
        .map_err(|_| XportError::InvalidHeader(format!("variable {name} has negative offset")))?;

    let valid = match kind {
        VariableKind::Numeric => (2..=8).contains(&length),
        VariableKind::Character => length > 0,
    };
    if !valid {
        return Err(XportError::InvalidVariable { name, length });
    }

    Ok(Variable {
        name,
        kind,
        length,
        position,
    })
}

enum ColumnBuilder {
    Numeric(Float64Builder),
    Character(StringBuilder),
}

fn decode_observations(variables: &[Variable], data: &[u8]) -> Result<RecordBatch> {
    let row_len = variables
        .iter()
        .map(|v| v.position + v.length)
        .max()
        .unwrap_or(0);

    let mut builders: Vec<ColumnBuilder> = variables
        .iter()
        .map(|v| match v.kind {
            VariableKind::Numeric => ColumnBuilder::Numeric(Float64Builder::new()),
            VariableKind::Character => ColumnBuilder::Character(StringBuilder::new()),
        })
        .collect();

    let mut num_rows = 0;
    if row_len > 0 {
        for (i, row) in data.chunks_exact(row_len).enumerate() {
            // Trailing blanks pad the last 80-byte record
            if row.iter().all(|&b| b == b' ')
                && data[(i + 1) * row_len..].iter().all(|&b| b == b' ')
            {
                break;
            }

            for (var, builder) in variables.iter().zip(builders.iter_mut()) {
                let field = &row[var.position..var.position + var.length];
                match builder {
                    ColumnBuilder::Numeric(b) => b.append_option(ibm_to_f64(field)),
                    ColumnBuilder::Character(b) => {
                        let value = text(field);
                        if value.is_empty() {
                            b.append_null();
                        } else {
                            b.append_value(value);
                        }
                    }
                }
            }
            num_rows += 1;
        }
    }

    let fields = variables
        .iter()
        .map(|v| {
            let data_type = match v.kind {
                VariableKind::Numeric => DataType::Float64,
                VariableKind::Character => DataType::Utf8,
            };
            Field::new(v.name.clone(), data_type, true)
        })
        .collect();
    let columns = builders
        .into_iter()
        .map(|b| -> ArrayRef {
            match b {
                ColumnBuilder::Numeric(mut b) => Arc::new(b.finish()),
                ColumnBuilder::Character(mut b) => Arc::new(b.finish()),
            }
        })
        .collect();

    batch_with_rows(fields, columns, num_rows)
        .map_err(|e| XportError::InvalidHeader(e.to_string()))
}

/// Convert an IBM-370 hexadecimal float of 2..=8 bytes to IEEE
///
/// Returns `None` for SAS missing values (`.`, `._`, `.A`..`.Z`).
#[must_use]
pub fn ibm_to_f64(raw: &[u8]) -> Option<f64> {
    let mut buf = [0u8; 8];
    let len = raw.len().min(8);
    buf[..len].copy_from_slice(&raw[..len]);

    let first = buf[0];
    let rest_zero = buf[1..].iter().all(|&b| b == 0);
    if rest_zero && (first == b'.' || first == b'_' || first.is_ascii_uppercase()) {
        return None;
    }

    let bits = u64::from_be_bytes(buf);
    let mantissa = bits & 0x00FF_FFFF_FFFF_FFFF;
    if mantissa == 0 {
        return Some(0.0);
    }
    let negative = bits >> 63 == 1;
    let exponent = i32::try_from((bits >> 56) & 0x7F).unwrap_or(0) - 64;

    #[allow(clippy::cast_precision_loss)]
    let magnitude = mantissa as f64 * 2f64.powi(4 * exponent - 56);
    Some(if negative { -magnitude } else { magnitude })
}
