//! Which codebooks a wave publishes
//!
//! A closure from wave to names is a catalog, so callers with a fixed list need
//! nothing more. [`DataPageCatalog`] discovers the list from the published
//! data-file listing instead.

use std::collections::BTreeSet;
use std::future::Future;

use futures::future::try_join_all;

use crate::config::SurveyConfig;
use crate::error::{FetchError, Result};
use crate::fetch::{Retriever, matches_prefix};
use crate::models::SurveyWave;
use crate::utils::logging::{log_operation_complete, log_operation_start};

/// Listing components a wave's data files are spread over
pub const DATA_PAGE_COMPONENTS: [&str; 5] = [
    "Demographics",
    "Dietary",
    "Examination",
    "Laboratory",
    "Questionnaire",
];

/// A provider of the codebook names of each wave
pub trait CodebookCatalog: Send + Sync {
    fn codebook_names(&self, wave: SurveyWave) -> impl Future<Output = Result<Vec<String>>> + Send;
}

impl<F, I, N> CodebookCatalog for F
where
    F: Fn(SurveyWave) -> I + Send + Sync,
    I: IntoIterator<Item = N>,
    N: Into<String>,
{
    fn codebook_names(
        &self,
        wave: SurveyWave,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        let names: Vec<String> = self(wave).into_iter().map(Into::into).collect();
        std::future::ready(Ok(names))
    }
}

/// Data file stems linked from a listing page, in page order
///
/// Any `href` ending in `.xpt` (in any case) counts; the stem is upper-cased to
/// match codebook names.
#[must_use]
pub fn data_file_names(page: &str) -> Vec<String> {
    page.split("href=")
        .skip(1)
        .filter_map(|rest| {
            let rest = rest.trim_start_matches(['"', '\'']);
            let end = rest.find(['"', '\'', ' ', '>']).unwrap_or(rest.len());
            let file = rest[..end].rsplit('/').next()?;
            let (stem, extension) = file.rsplit_once('.')?;
            (extension.eq_ignore_ascii_case("xpt") && !stem.is_empty())
                .then(|| stem.to_ascii_uppercase())
        })
        .collect()
}

/// Catalog read from the published data-file listing of each component
#[derive(Debug, Clone)]
pub struct DataPageCatalog<R> {
    retriever: R,
    data_page_url: String,
    excluded_prefixes: Vec<String>,
}

impl<R: Retriever> DataPageCatalog<R> {
    pub fn new(retriever: R, config: &SurveyConfig) -> Self {
        Self {
            retriever,
            data_page_url: config.data_page_url.clone(),
            excluded_prefixes: config.excluded_prefixes.clone(),
        }
    }

    /// Listing location of one component of one wave
    #[must_use]
    pub fn page_location(&self, wave: SurveyWave, component: &str) -> String {
        format!(
            "{}?Component={component}&CycleBeginYear={}",
            self.data_page_url,
            wave.start_year()
        )
    }

    async fn component_names(&self, wave: SurveyWave, component: &str) -> Result<Vec<String>> {
        let location = self.page_location(wave, component);
        let bytes = self
            .retriever
            .get(&location)
            .await
            .map_err(FetchError::from)?;
        Ok(data_file_names(&String::from_utf8_lossy(&bytes)))
    }
}

impl<R: Retriever> CodebookCatalog for DataPageCatalog<R> {
    /// Sorted, de-duplicated names of every listed data file outside the
    /// deny-list; a listing that cannot be retrieved fails the wave
    async fn codebook_names(&self, wave: SurveyWave) -> Result<Vec<String>> {
        log_operation_start("Listing codebooks", &wave);

        let pages = try_join_all(
            DATA_PAGE_COMPONENTS
                .iter()
                .map(|component| self.component_names(wave, component)),
        )
        .await?;

        let names: BTreeSet<String> = pages
            .into_iter()
            .flatten()
            .filter(|name| !matches_prefix(&self.excluded_prefixes, name))
            .collect();

        log_operation_complete("list", &wave, names.len(), None);
        Ok(names.into_iter().collect())
    }
}
