//! Fetching single codebooks and mortality files
//!
//! A [`Fetcher`] turns a `(wave, codebook)` pair into a source location, asks its
//! [`Retriever`] for the payload, decodes it and checks the structural
//! assumptions the merge engine relies on. Transient failures get exactly one
//! more attempt.

pub mod retriever;

use std::time::Instant;

use crate::config::SurveyConfig;
use crate::error::{FetchError, FetchReason};
use crate::models::{Codebook, KeyedTable, Mortality, SurveyWave};
use crate::reader::{read_mortality, read_xport};
use crate::utils::logging::{log_operation_complete, log_operation_start, log_warning};

pub use retriever::{ReqwestRetriever, RetrievalError, RetrievalErrorKind, Retriever};

/// Map a transport failure to a fetch reason
///
/// Error statuses count as a missing resource and broken connections as a
/// timeout, so both fall in the retryable class.
#[must_use]
pub const fn classify(kind: RetrievalErrorKind) -> FetchReason {
    match kind {
        RetrievalErrorKind::NotFound | RetrievalErrorKind::Status(_) => FetchReason::NotFound,
        RetrievalErrorKind::Timeout | RetrievalErrorKind::Connect => FetchReason::Timeout,
    }
}

impl From<RetrievalError> for FetchError {
    fn from(error: RetrievalError) -> Self {
        Self::new(classify(error.kind), error.url, error.message)
    }
}

/// Whether a codebook name starts with any of the excluded prefixes
#[must_use]
pub fn matches_prefix(prefixes: &[String], codebook: &str) -> bool {
    prefixes.iter().any(|prefix| codebook.starts_with(prefix.as_str()))
}

/// Decode a transport payload into a codebook keyed by `SEQN`
pub fn decode_codebook(bytes: &[u8], location: &str) -> Result<Codebook, FetchError> {
    let batch = read_xport(bytes)
        .map_err(|e| FetchError::new(FetchReason::Malformed, location, e.to_string()))?;

    let table = match KeyedTable::from_record_batch(&batch) {
        Ok(Some(table)) => table,
        Ok(None) => {
            return Err(FetchError::new(FetchReason::NoKeyColumn, location, "No SEQN index"));
        }
        // a key that cannot become an i64 (fractional, out of range, missing)
        Err(e) => {
            return Err(FetchError::new(FetchReason::Overflow, location, e.to_string()));
        }
    };

    if let Some(key) = table.first_duplicate_key() {
        return Err(FetchError::new(
            FetchReason::DuplicateKey,
            location,
            format!("Repeating SEQN rows (first repeat: {key})"),
        ));
    }

    Ok(Codebook::new(table))
}

/// Retrieves and validates survey tables
#[derive(Debug, Clone)]
pub struct Fetcher<R> {
    retriever: R,
    codebook_base_url: String,
    mortality_base_url: String,
    excluded_prefixes: Vec<String>,
    concurrency: usize,
}

impl<R: Retriever> Fetcher<R> {
    pub fn new(retriever: R, config: &SurveyConfig) -> Self {
        Self {
            retriever,
            codebook_base_url: config.codebook_base_url.clone(),
            mortality_base_url: config.mortality_base_url.clone(),
            excluded_prefixes: config.excluded_prefixes.clone(),
            concurrency: config.concurrency,
        }
    }

    /// Maximum number of fetches in flight during a batch
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Source location of a codebook
    #[must_use]
    pub fn codebook_location(&self, wave: SurveyWave, codebook: &str) -> String {
        wave.codebook_url(&self.codebook_base_url, codebook)
    }

    /// Source location of a wave's mortality file
    #[must_use]
    pub fn mortality_location(&self, wave: SurveyWave) -> String {
        wave.mortality_url(&self.mortality_base_url)
    }

    /// Whether a codebook name matches the deny-list
    #[must_use]
    pub fn is_excluded(&self, codebook: &str) -> bool {
        matches_prefix(&self.excluded_prefixes, codebook)
    }

    /// Fetch one codebook, retrying once on a transient failure
    pub async fn fetch_codebook(
        &self,
        wave: SurveyWave,
        codebook: &str,
    ) -> Result<Codebook, FetchError> {
        let location = self.codebook_location(wave, codebook);
        if self.is_excluded(codebook) {
            return Err(FetchError::new(
                FetchReason::Excluded,
                location,
                format!("Codebook {codebook} is on the exclusion list"),
            ));
        }

        match self.try_fetch_codebook(&location).await {
            Err(first) if first.reason.is_transient() => {
                log_warning(&format!("Retrying after failure ({first})"), Some(&codebook));
                self.try_fetch_codebook(&location)
                    .await
                    .map_err(FetchError::retry_failed)
            }
            result => result,
        }
    }

    async fn try_fetch_codebook(&self, location: &str) -> Result<Codebook, FetchError> {
        log_operation_start("Fetching codebook", &location);
        let start = Instant::now();

        let bytes = self.retriever.get(location).await?;
        let codebook = decode_codebook(&bytes, location)?;

        log_operation_complete("fetched", &location, codebook.num_rows(), Some(start.elapsed()));
        Ok(codebook)
    }

    /// Fetch the mortality file of one wave; there is no retry
    pub async fn fetch_mortality(&self, wave: SurveyWave) -> Result<Mortality, FetchError> {
        let location = self.mortality_location(wave);
        log_operation_start("Fetching mortality", &location);
        let start = Instant::now();

        let bytes = self.retriever.get(&location).await?;
        let records = read_mortality(&bytes)
            .map_err(|e| FetchError::new(FetchReason::Malformed, location.as_str(), e.to_string()))?;

        if !records.skipped_lines.is_empty() {
            log_warning(
                &format!(
                    "Skipped {} mortality records without a numeric PUBLICID",
                    records.skipped_lines.len()
                ),
                Some(&location),
            );
        }

        log_operation_complete(
            "fetched",
            &location,
            records.table.num_rows(),
            Some(start.elapsed()),
        );
        Ok(Mortality::new(records.table))
    }
}
