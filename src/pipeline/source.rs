//! Where pipeline tables come from: the network, the cache in front of it, or
//! the cache alone.

use std::future::Future;
use std::time::Instant;

use crate::async_io::{BatchOutcome, run_batch};
use crate::cache::TableCache;
use crate::config::SurveyConfig;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, Retriever};
use crate::models::{Codebook, CodebookRequest, KeyedTable, Mortality, SurveyWave, TableKey};
use crate::utils::logging::{create_main_progress_bar, finish_progress_bar, log_operation_complete};

/// A provider of codebook and mortality tables
pub trait TableSource: Send + Sync {
    /// One codebook of one wave
    fn codebook(
        &self,
        wave: SurveyWave,
        codebook: &str,
    ) -> impl Future<Output = Result<Codebook>> + Send;

    /// Mortality follow-up of one wave
    fn mortality(&self, wave: SurveyWave) -> impl Future<Output = Result<Mortality>> + Send;

    /// Maximum number of tables in flight during a batch
    fn concurrency(&self) -> usize;

    /// Every codebook of a request, collecting failures instead of stopping
    fn codebooks(
        &self,
        request: &CodebookRequest,
    ) -> impl Future<Output = BatchOutcome<TableKey, Codebook>> + Send {
        async move {
            let keys: Vec<TableKey> = request.keys().collect();
            run_batch(keys, self.concurrency(), None, move |key| async move {
                match key {
                    TableKey::Codebook { wave, name } => self.codebook(wave, &name).await,
                    TableKey::Mortality { wave } => Err(Error::Config(format!(
                        "Mortality of {wave} requested as a codebook"
                    ))),
                }
            })
            .await
        }
    }

    /// Mortality tables of several waves, collecting failures
    fn mortalities(
        &self,
        waves: &[SurveyWave],
    ) -> impl Future<Output = BatchOutcome<TableKey, Mortality>> + Send {
        async move {
            let keys: Vec<TableKey> = waves.iter().copied().map(TableKey::mortality).collect();
            run_batch(keys, self.concurrency(), None, move |key| async move {
                self.mortality(key.wave()).await
            })
            .await
        }
    }
}

impl<R: Retriever> TableSource for Fetcher<R> {
    async fn codebook(&self, wave: SurveyWave, codebook: &str) -> Result<Codebook> {
        Ok(self.fetch_codebook(wave, codebook).await?)
    }

    async fn mortality(&self, wave: SurveyWave) -> Result<Mortality> {
        Ok(self.fetch_mortality(wave).await?)
    }

    fn concurrency(&self) -> usize {
        Fetcher::concurrency(self)
    }
}

/// Fetcher behind the on-disk cache
#[derive(Debug, Clone)]
pub struct CachedSource<R> {
    fetcher: Fetcher<R>,
    cache: TableCache,
    force_refresh: bool,
    prefetch_mortality: bool,
}

impl<R: Retriever> CachedSource<R> {
    pub fn new(retriever: R, config: &SurveyConfig) -> Self {
        Self {
            fetcher: Fetcher::new(retriever, config),
            cache: TableCache::new(&config.cache_dir, config.concurrency),
            force_refresh: config.force_refresh,
            prefetch_mortality: config.prefetch_mortality,
        }
    }

    #[must_use]
    pub const fn fetcher(&self) -> &Fetcher<R> {
        &self.fetcher
    }

    #[must_use]
    pub const fn cache(&self) -> &TableCache {
        &self.cache
    }

    /// A source reading only what this one has cached
    ///
    /// Assembling from it after [`CachedSource::prefetch`] does not go back to
    /// the network for tables that failed to prefetch.
    #[must_use]
    pub fn cache_only(&self) -> CacheOnlySource {
        CacheOnlySource::new(self.cache.clone())
    }

    async fn produce(&self, key: TableKey) -> Result<KeyedTable> {
        match key {
            TableKey::Codebook { wave, name } => {
                Ok(self.fetcher.fetch_codebook(wave, &name).await?.into_table())
            }
            TableKey::Mortality { wave } => Ok(self.fetcher.fetch_mortality(wave).await?.into_table()),
        }
    }

    /// Fill the cache for every requested codebook, plus each wave's mortality
    /// file when configured
    pub async fn prefetch(&self, requests: &[CodebookRequest]) -> BatchOutcome<TableKey, KeyedTable> {
        let mut keys: Vec<TableKey> = requests.iter().flat_map(CodebookRequest::keys).collect();
        if self.prefetch_mortality {
            let mut waves: Vec<SurveyWave> = requests.iter().map(|r| r.wave).collect();
            waves.sort_unstable();
            waves.dedup();
            keys.extend(waves.into_iter().map(TableKey::mortality));
        }

        let start = Instant::now();
        let pb = create_main_progress_bar(keys.len() as u64, Some("Caching survey tables"));
        let outcome = self
            .cache
            .get_or_fetch_batch(keys, move |key| self.produce(key), self.force_refresh, Some(&pb))
            .await;

        finish_progress_bar(
            &pb,
            Some(&format!(
                "Cached {} of {} tables",
                outcome.succeeded.len(),
                outcome.requested()
            )),
        );
        log_operation_complete(
            "cached",
            &self.cache.root().display(),
            outcome.succeeded.len(),
            Some(start.elapsed()),
        );
        outcome
    }
}

impl<R: Retriever> TableSource for CachedSource<R> {
    async fn codebook(&self, wave: SurveyWave, codebook: &str) -> Result<Codebook> {
        let location = self.cache.codebook_location(wave, codebook);
        self.cache
            .get_or_fetch(
                &location,
                move || async move {
                    self.fetcher.fetch_codebook(wave, codebook).await.map_err(Error::from)
                },
                self.force_refresh,
            )
            .await
    }

    async fn mortality(&self, wave: SurveyWave) -> Result<Mortality> {
        let location = self.cache.mortality_location(wave);
        self.cache
            .get_or_fetch(
                &location,
                move || async move { self.fetcher.fetch_mortality(wave).await.map_err(Error::from) },
                self.force_refresh,
            )
            .await
    }

    fn concurrency(&self) -> usize {
        self.fetcher.concurrency()
    }
}

/// Tables from the cache only; nothing is fetched
#[derive(Debug, Clone)]
pub struct CacheOnlySource {
    cache: TableCache,
}

impl CacheOnlySource {
    #[must_use]
    pub const fn new(cache: TableCache) -> Self {
        Self { cache }
    }

    pub fn from_config(config: &SurveyConfig) -> Self {
        Self::new(TableCache::new(&config.cache_dir, config.concurrency))
    }

    #[must_use]
    pub const fn cache(&self) -> &TableCache {
        &self.cache
    }
}

impl TableSource for CacheOnlySource {
    async fn codebook(&self, wave: SurveyWave, codebook: &str) -> Result<Codebook> {
        self.cache
            .read_key(&TableKey::codebook(wave, codebook))
            .await
            .map(Codebook::new)
    }

    async fn mortality(&self, wave: SurveyWave) -> Result<Mortality> {
        self.cache
            .read_key(&TableKey::mortality(wave))
            .await
            .map(Mortality::new)
    }

    fn concurrency(&self) -> usize {
        self.cache.concurrency()
    }
}
