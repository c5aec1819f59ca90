//! A Rust library for downloading, caching and assembling NHANES survey
//! codebooks, linked with public-use mortality follow-up.

pub mod async_io;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod reader;
pub mod utils;

// Re-export the most common types for easier use
// Core types
pub use config::{BatchPolicy, ColumnCollision, SurveyConfig};
pub use error::{CacheError, Error, FetchError, FetchReason, MergeError, Result};
pub use models::{Codebook, CodebookRequest, KeyedTable, Mortality, SUBJECT_KEY, SurveyWave, TableKey};

// Fetching and caching
pub use async_io::BatchOutcome;
pub use cache::TableCache;
pub use fetch::{Fetcher, ReqwestRetriever, RetrievalError, RetrievalErrorKind, Retriever};

// Assembly
pub use merge::{
    append_codebooks, append_mortalities, join_codebooks, link_codebook_with_mortality,
};
pub use pipeline::{
    CacheOnlySource, CachedSource, CodebookCatalog, DataPageCatalog, Pipeline, TableSource,
};

// Arrow types
pub use arrow::record_batch::RecordBatch;
