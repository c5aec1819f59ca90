#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use nhanes_dl::{
    Codebook, KeyedTable, Mortality, RetrievalError, RetrievalErrorKind, Retriever, SurveyConfig,
    SurveyWave,
};

pub const CODEBOOK_BASE: &str = "http://nhanes.test/codebooks";
pub const MORTALITY_BASE: &str = "http://nhanes.test/mortality";
pub const DATA_PAGE: &str = "http://nhanes.test/datapage";

/// Configuration pointing at the scripted retriever and a fresh cache directory
#[must_use]
pub fn test_config() -> SurveyConfig {
    SurveyConfig::default()
        .with_codebook_base_url(CODEBOOK_BASE)
        .with_mortality_base_url(MORTALITY_BASE)
        .with_data_page_url(DATA_PAGE)
        .with_cache_dir(temp_cache_dir())
        .with_concurrency(4)
}

/// Unique, not yet existing directory under the system temp dir
#[must_use]
pub fn temp_cache_dir() -> PathBuf {
    std::env::temp_dir().join(format!("nhanes-dl-test-{:016x}", rand::random::<u64>()))
}

#[must_use]
pub fn data_page_url(wave: SurveyWave, component: &str) -> String {
    format!("{DATA_PAGE}?Component={component}&CycleBeginYear={}", wave.start_year())
}

/// Listing page linking each named data file
#[must_use]
pub fn data_page(wave: SurveyWave, names: &[&str]) -> Vec<u8> {
    let label = wave.label();
    let rows: String = names
        .iter()
        .map(|name| format!(r#"<tr><td><a href="/Nchs/Nhanes/{label}/{name}.XPT">{name}</a></td></tr>"#))
        .collect();
    format!("<html><table>{rows}</table></html>").into_bytes()
}

#[must_use]
pub fn codebook_url(wave: SurveyWave, codebook: &str) -> String {
    wave.codebook_url(CODEBOOK_BASE, codebook)
}

#[must_use]
pub fn mortality_url(wave: SurveyWave) -> String {
    wave.mortality_url(MORTALITY_BASE)
}

/// A scripted response
#[derive(Debug, Clone)]
pub enum Reply {
    Body(Vec<u8>),
    Fail(RetrievalErrorKind),
}

/// In-memory retriever that replays scripted replies per URL and counts calls
///
/// Replies are consumed in order; the last one repeats. An unscripted URL
/// answers `NotFound`.
#[derive(Debug, Default)]
pub struct ScriptedRetriever {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedRetriever {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reply(self, url: impl Into<String>, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push_back(reply);
        self
    }

    #[must_use]
    pub fn body(self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.reply(url, Reply::Body(bytes))
    }

    #[must_use]
    pub fn fail(self, url: impl Into<String>, kind: RetrievalErrorKind) -> Self {
        self.reply(url, Reply::Fail(kind))
    }

    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

impl Retriever for ScriptedRetriever {
    async fn get(&self, url: &str) -> Result<Vec<u8>, RetrievalError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            replies.get_mut(url).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
        };

        match reply {
            Some(Reply::Body(bytes)) => Ok(bytes),
            Some(Reply::Fail(kind)) => Err(RetrievalError::new(kind, url, format!("{kind:?}"))),
            None => Err(RetrievalError::new(RetrievalErrorKind::NotFound, url, "HTTP 404")),
        }
    }
}

/// IEEE to IBM-370 hexadecimal float
fn f64_to_ibm(value: f64) -> [u8; 8] {
    if value == 0.0 {
        return [0; 8];
    }
    let sign = if value < 0.0 { 0x80u8 } else { 0 };
    let mut v = value.abs();
    let mut exponent = 64i32;
    while v >= 1.0 {
        v /= 16.0;
        exponent += 1;
    }
    while v < 1.0 / 16.0 {
        v *= 16.0;
        exponent -= 1;
    }
    let mantissa = (v * 2f64.powi(56)) as u64;
    let mut out = mantissa.to_be_bytes();
    out[0] = sign | u8::try_from(exponent).unwrap();
    out
}

fn header(name: &str, tail: &str) -> Vec<u8> {
    let mut rec = format!("HEADER RECORD*******{name}!!!!!!!{tail}").into_bytes();
    rec.resize(80, b' ');
    rec
}

fn pad_to_record(bytes: &mut Vec<u8>) {
    bytes.resize(bytes.len().div_ceil(80) * 80, b' ');
}

/// Transport file with 8-byte numeric columns; `None` is the SAS missing value
#[must_use]
pub fn xpt_bytes(columns: &[&str], rows: &[Vec<Option<f64>>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(header("LIBRARY HEADER RECORD", &"0".repeat(30)));
    out.extend(vec![b' '; 160]);
    out.extend(header("MEMBER  HEADER RECORD", "000000000000000001600000000140"));
    out.extend(header("DSCRPTR HEADER RECORD", &"0".repeat(30)));
    out.extend(vec![b' '; 160]);
    out.extend(header(
        "NAMESTR HEADER RECORD",
        &format!("000000{:04}{}", columns.len(), "0".repeat(20)),
    ));

    let mut descriptors = Vec::new();
    for (i, name) in columns.iter().enumerate() {
        let mut raw = vec![0u8; 140];
        raw[0..2].copy_from_slice(&1i16.to_be_bytes());
        raw[4..6].copy_from_slice(&8i16.to_be_bytes());
        let mut padded_name = name.as_bytes().to_vec();
        padded_name.resize(8, b' ');
        raw[8..16].copy_from_slice(&padded_name);
        raw[16..56].fill(b' ');
        raw[84..88].copy_from_slice(&i32::try_from(i * 8).unwrap().to_be_bytes());
        descriptors.extend(raw);
    }
    pad_to_record(&mut descriptors);
    out.extend(descriptors);

    out.extend(header("OBS     HEADER RECORD", &"0".repeat(30)));
    let mut obs = Vec::new();
    for row in rows {
        for value in row {
            match value {
                Some(v) => obs.extend(f64_to_ibm(*v)),
                None => obs.extend([b'.', 0, 0, 0, 0, 0, 0, 0]),
            }
        }
    }
    pad_to_record(&mut obs);
    out.extend(obs);
    out
}

/// Codebook payload with `SEQN` plus one numeric column per name
#[must_use]
pub fn codebook_xpt(keys: &[i64], columns: &[(&str, Vec<Option<f64>>)]) -> Vec<u8> {
    let mut names = vec!["SEQN"];
    names.extend(columns.iter().map(|(name, _)| *name));
    let rows: Vec<Vec<Option<f64>>> = keys
        .iter()
        .enumerate()
        .map(|(row, &key)| {
            let mut values = vec![Some(key as f64)];
            values.extend(columns.iter().map(|(_, col)| col[row]));
            values
        })
        .collect();
    xpt_bytes(&names, &rows)
}

/// One fixed-width mortality record
#[must_use]
pub fn mortality_line(publicid: i64, mortstat: u8, permth: u16) -> String {
    format!("{publicid:<14}1{mortstat}{:<3}00{:<21}{permth:<3}{permth:<3}", "", "")
}

/// Mortality payload from `(publicid, mortstat, permth)` triples
#[must_use]
pub fn mortality_payload(records: &[(i64, u8, u16)]) -> Vec<u8> {
    records
        .iter()
        .map(|&(id, stat, permth)| mortality_line(id, stat, permth))
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

/// Keyed table of `Float64` columns
#[must_use]
pub fn keyed_table(keys: &[i64], columns: &[(&str, Vec<Option<f64>>)]) -> KeyedTable {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, _)| Field::new(*name, DataType::Float64, true))
        .collect();
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|(_, values)| Arc::new(Float64Array::from(values.clone())) as ArrayRef)
        .collect();
    let data = RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        arrays,
        &RecordBatchOptions::new().with_row_count(Some(keys.len())),
    )
    .unwrap();
    KeyedTable::try_new(Int64Array::from(keys.to_vec()), data).unwrap()
}

#[must_use]
pub fn codebook(keys: &[i64], columns: &[(&str, Vec<Option<f64>>)]) -> Codebook {
    Codebook::new(keyed_table(keys, columns))
}

#[must_use]
pub fn mortality(keys: &[i64], columns: &[(&str, Vec<Option<f64>>)]) -> Mortality {
    Mortality::new(keyed_table(keys, columns))
}

/// Values of a `Float64` column
#[must_use]
pub fn float_column(table: &KeyedTable, name: &str) -> Vec<Option<f64>> {
    table
        .column(name)
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap()
        .iter()
        .collect()
}
