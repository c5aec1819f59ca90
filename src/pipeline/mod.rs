//! Assembly of survey tables from any [`TableSource`]
//!
//! The pipeline asks its source for tables, joins codebooks of a wave, appends
//! waves and links the result with mortality follow-up. It never retries; that
//! is the fetcher's business.

pub mod catalog;
pub mod source;

use std::collections::BTreeMap;
use std::time::Instant;

use crate::async_io::{BatchOutcome, run_batch};
use crate::config::{BatchPolicy, ColumnCollision, SurveyConfig};
use crate::error::Result;
use crate::merge::{
    append_codebooks, append_mortalities, join_codebooks_with, link_codebook_with_mortality_with,
};
use crate::models::{Codebook, CodebookRequest, Mortality, SurveyWave};
use crate::utils::logging::{log_operation_complete, log_operation_start};

pub use catalog::{CodebookCatalog, DataPageCatalog};
pub use source::{CacheOnlySource, CachedSource, TableSource};

/// Merge orchestration over a table source
#[derive(Debug, Clone)]
pub struct Pipeline<S> {
    source: S,
    batch_policy: BatchPolicy,
    column_collision: ColumnCollision,
}

impl<S: TableSource> Pipeline<S> {
    pub fn new(source: S, config: &SurveyConfig) -> Self {
        Self {
            source,
            batch_policy: config.batch_policy,
            column_collision: config.column_collision,
        }
    }

    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub const fn batch_policy(&self) -> BatchPolicy {
        self.batch_policy
    }

    #[must_use]
    pub const fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.batch_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_column_collision(mut self, policy: ColumnCollision) -> Self {
        self.column_collision = policy;
        self
    }

    /// Apply the batch policy to an outcome
    fn settle<K, T>(&self, outcome: BatchOutcome<K, T>) -> Result<Vec<T>> {
        match self.batch_policy {
            BatchPolicy::Strict => outcome.into_strict(),
            BatchPolicy::Lenient => {
                if !outcome.is_complete() {
                    log::warn!(
                        "Continuing with {} of {} tables",
                        outcome.succeeded.len(),
                        outcome.requested()
                    );
                }
                Ok(outcome.into_values())
            }
        }
    }

    /// One codebook of one wave
    pub async fn codebook(&self, wave: SurveyWave, codebook: &str) -> Result<Codebook> {
        self.source.codebook(wave, codebook).await
    }

    /// Every codebook of a request, joined on the subject key
    pub async fn codebooks(&self, request: &CodebookRequest) -> Result<Codebook> {
        log_operation_start("Assembling codebooks of", &request.wave);
        let start = Instant::now();

        let outcome = self.source.codebooks(request).await;
        let tables = self.settle(outcome)?;
        let joined = join_codebooks_with(&tables, self.column_collision)?;

        log_operation_complete("joined", &request.wave, joined.num_rows(), Some(start.elapsed()));
        Ok(joined)
    }

    /// Codebooks of several waves; each wave is joined, then waves are appended
    /// in wave order
    pub async fn codebooks_for_waves(&self, requests: &[CodebookRequest]) -> Result<Codebook> {
        let mut joined = Vec::with_capacity(requests.len());
        for request in by_wave(requests).values() {
            joined.push(self.codebooks(request).await?);
        }
        Ok(append_codebooks(&joined)?)
    }

    /// Mortality follow-up of one wave
    pub async fn mortality(&self, wave: SurveyWave) -> Result<Mortality> {
        self.source.mortality(wave).await
    }

    /// Mortality follow-up of several waves, appended in the given order
    pub async fn mortality_for_waves(&self, waves: &[SurveyWave]) -> Result<Mortality> {
        let outcome = self.source.mortalities(waves).await;
        let tables = self.settle(outcome)?;
        Ok(append_mortalities(&tables)?)
    }

    /// One codebook linked with its wave's mortality
    pub async fn codebook_with_mortality(
        &self,
        wave: SurveyWave,
        codebook: &str,
    ) -> Result<Codebook> {
        let book = self.codebook(wave, codebook).await?;
        let mortality = self.mortality(wave).await?;
        Ok(link_codebook_with_mortality_with(
            &book,
            &mortality,
            self.column_collision,
        )?)
    }

    /// A wave's joined codebooks linked with its mortality
    pub async fn codebooks_with_mortality(&self, request: &CodebookRequest) -> Result<Codebook> {
        let book = self.codebooks(request).await?;
        let mortality = self.mortality(request.wave).await?;
        Ok(link_codebook_with_mortality_with(
            &book,
            &mortality,
            self.column_collision,
        )?)
    }

    /// Codebooks of several waves linked with the mortality of those waves
    pub async fn codebooks_with_mortality_for_waves(
        &self,
        requests: &[CodebookRequest],
    ) -> Result<Codebook> {
        let waves: Vec<SurveyWave> = by_wave(requests).keys().copied().collect();
        let book = self.codebooks_for_waves(requests).await?;
        let mortality = self.mortality_for_waves(&waves).await?;
        Ok(link_codebook_with_mortality_with(
            &book,
            &mortality,
            self.column_collision,
        )?)
    }

    /// Every known wave linked with mortality
    ///
    /// `catalog` supplies the codebook names of each wave; a wave with no names
    /// is skipped. A wave whose names cannot be listed is handled by the batch
    /// policy like a failed table.
    pub async fn all_waves_with_mortality<C>(&self, catalog: &C) -> Result<Codebook>
    where
        C: CodebookCatalog,
    {
        let waves: Vec<SurveyWave> = SurveyWave::all().collect();
        let listed = run_batch(waves, self.source.concurrency(), None, move |wave| async move {
            catalog
                .codebook_names(wave)
                .await
                .map(|names| CodebookRequest::new(wave, names))
        })
        .await;

        let requests: Vec<CodebookRequest> = self
            .settle(listed)?
            .into_iter()
            .filter(|request| !request.is_empty())
            .collect();
        self.codebooks_with_mortality_for_waves(&requests).await
    }
}

/// Requests keyed by wave; requests for the same wave are combined
fn by_wave(requests: &[CodebookRequest]) -> BTreeMap<SurveyWave, CodebookRequest> {
    let mut merged: BTreeMap<SurveyWave, CodebookRequest> = BTreeMap::new();
    for request in requests {
        merged
            .entry(request.wave)
            .or_insert_with(|| CodebookRequest::new(request.wave, Vec::<String>::new()))
            .codebooks
            .extend(request.codebooks.iter().cloned());
    }
    merged
}
