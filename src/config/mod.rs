//! Configuration for fetching, caching and merging survey tables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default base location of codebook payloads
pub const DEFAULT_CODEBOOK_BASE_URL: &str = "https://wwwn.cdc.gov/Nchs/Nhanes";

/// Default base location of linked mortality files
pub const DEFAULT_MORTALITY_BASE_URL: &str =
    "https://ftp.cdc.gov/pub/Health_Statistics/NCHS/datalinkage/linked_mortality";

/// Default listing page of published data files, queried per component and wave
pub const DEFAULT_DATA_PAGE_URL: &str = "https://wwwn.cdc.gov/nchs/nhanes/search/datapage.aspx";

/// Default per-fetch network timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// How a batch treats individual failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Drop failed items and continue with the rest
    #[default]
    Lenient,
    /// Fail the whole operation on the first failed item
    Strict,
}

/// What to do when two joined tables carry the same column name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnCollision {
    /// Report the collision as an error
    #[default]
    Reject,
    /// Keep the column from the earliest table and drop later ones
    KeepFirst,
}

/// Configuration for the survey pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    /// Base URL that codebook locations are built from
    pub codebook_base_url: String,
    /// Base URL that mortality locations are built from
    pub mortality_base_url: String,
    /// Listing page used to discover a wave's codebooks
    pub data_page_url: String,
    /// Root directory of the table cache
    pub cache_dir: PathBuf,
    /// Codebook name prefixes that are never downloaded
    pub excluded_prefixes: Vec<String>,
    /// Network timeout for a single fetch, in seconds
    pub timeout_secs: u64,
    /// Number of batch items fetched concurrently
    pub concurrency: usize,
    /// Ignore existing cache snapshots and fetch again
    pub force_refresh: bool,
    /// Failure handling for batches
    pub batch_policy: BatchPolicy,
    /// Column name collision handling for joins
    pub column_collision: ColumnCollision,
    /// Whether a cache prefetch also warms each wave's mortality file
    pub prefetch_mortality: bool,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            codebook_base_url: DEFAULT_CODEBOOK_BASE_URL.to_string(),
            mortality_base_url: DEFAULT_MORTALITY_BASE_URL.to_string(),
            data_page_url: DEFAULT_DATA_PAGE_URL.to_string(),
            cache_dir: PathBuf::from("nhanes_cache"),
            excluded_prefixes: vec!["PAXMIN".to_string()],
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            concurrency: num_cpus::get(),
            force_refresh: false,
            batch_policy: BatchPolicy::Lenient,
            column_collision: ColumnCollision::Reject,
            prefetch_mortality: true,
        }
    }
}

impl SurveyConfig {
    /// Build a configuration from defaults overridden by environment variables
    ///
    /// Recognised variables: `NHANES_CACHE_DIR`, `NHANES_TIMEOUT_SECS`,
    /// `NHANES_CONCURRENCY`, `NHANES_FORCE_REFRESH` and `NHANES_STRICT`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("NHANES_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(secs) = std::env::var("NHANES_TIMEOUT_SECS") {
            config.timeout_secs = secs
                .parse()
                .map_err(|e| Error::Config(format!("NHANES_TIMEOUT_SECS={secs}: {e}")))?;
        }
        if let Ok(n) = std::env::var("NHANES_CONCURRENCY") {
            config.concurrency = n
                .parse()
                .map_err(|e| Error::Config(format!("NHANES_CONCURRENCY={n}: {e}")))?;
        }
        if let Ok(flag) = std::env::var("NHANES_FORCE_REFRESH") {
            config.force_refresh = parse_flag(&flag);
        }
        if let Ok(flag) = std::env::var("NHANES_STRICT") {
            if parse_flag(&flag) {
                config.batch_policy = BatchPolicy::Strict;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values are usable
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Per-fetch timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_codebook_base_url(mut self, url: impl Into<String>) -> Self {
        self.codebook_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_mortality_base_url(mut self, url: impl Into<String>) -> Self {
        self.mortality_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_data_page_url(mut self, url: impl Into<String>) -> Self {
        self.data_page_url = url.into();
        self
    }

    #[must_use]
    pub fn with_excluded_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub const fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
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

    #[must_use]
    pub const fn with_prefetch_mortality(mut self, prefetch: bool) -> Self {
        self.prefetch_mortality = prefetch;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
