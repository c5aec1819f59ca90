//! On-disk cache of fetched tables
//!
//! Snapshots live under `{root}/{start}-{end}/{stem}.csv`, with the column
//! types in `{stem}.schema.json` beside them. A snapshot that exists is
//! returned as-is unless a refresh is forced; otherwise the producer is invoked
//! and its result written back before it is returned.
//!
//! Both files are written to a `.tmp` sibling and renamed into place, so a
//! snapshot path only ever holds a complete file.

pub mod csv;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use indicatif::ProgressBar;

use crate::async_io::{BatchOutcome, run_batch};
use crate::error::{CacheError, Error, Result};
use crate::models::{KeyedTable, SurveyWave, TableKey};
use crate::utils::logging::{log_operation_complete, log_operation_start};

/// Snapshot extension
pub const SNAPSHOT_EXTENSION: &str = "csv";

/// Extension of the column-type file beside a snapshot
pub const SCHEMA_EXTENSION: &str = "schema.json";

/// Path of the column-type file for the snapshot at `location`
#[must_use]
pub fn schema_location(location: &Path) -> PathBuf {
    location.with_extension(SCHEMA_EXTENSION)
}

/// Scratch path a file is written to before being renamed to `path`
fn scratch_location(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `bytes` next to `path`, then rename over it
async fn write_replacing(path: &Path, bytes: &[u8]) -> std::result::Result<(), CacheError> {
    let scratch = scratch_location(path);
    let io_error = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&scratch, bytes).await.map_err(io_error)?;
    tokio::fs::rename(&scratch, path).await.map_err(io_error)
}

/// Cache rooted at one directory
#[derive(Debug, Clone)]
pub struct TableCache {
    root: PathBuf,
    concurrency: usize,
}

impl TableCache {
    pub fn new(root: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            root: root.into(),
            concurrency: concurrency.max(1),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Directory holding one wave's snapshots
    #[must_use]
    pub fn wave_dir(&self, wave: SurveyWave) -> PathBuf {
        self.root.join(wave.label())
    }

    /// Snapshot path for any cached table
    #[must_use]
    pub fn location(&self, key: &TableKey) -> PathBuf {
        self.wave_dir(key.wave())
            .join(format!("{}.{SNAPSHOT_EXTENSION}", key.stem()))
    }

    #[must_use]
    pub fn codebook_location(&self, wave: SurveyWave, codebook: &str) -> PathBuf {
        self.location(&TableKey::codebook(wave, codebook))
    }

    #[must_use]
    pub fn mortality_location(&self, wave: SurveyWave) -> PathBuf {
        self.location(&TableKey::mortality(wave))
    }

    /// Whether a snapshot exists at `location`
    pub async fn contains(&self, location: &Path) -> bool {
        tokio::fs::try_exists(location).await.unwrap_or(false)
    }

    /// Read a snapshot
    ///
    /// # Errors
    /// [`CacheError::Missing`] when there is no snapshot at `location`.
    pub async fn read(&self, location: &Path) -> std::result::Result<KeyedTable, CacheError> {
        if !self.contains(location).await {
            return Err(CacheError::Missing(location.to_path_buf()));
        }

        log_operation_start("Reading cached table", &location.display());
        let start = Instant::now();

        let bytes = tokio::fs::read(location).await.map_err(|source| CacheError::Io {
            path: location.to_path_buf(),
            source,
        })?;
        let recorded = self.read_schema(location).await?;
        let batch = csv::decode_batch(&bytes, recorded.as_ref()).map_err(|source| {
            CacheError::Arrow {
                path: location.to_path_buf(),
                source,
            }
        })?;
        let table = KeyedTable::from_record_batch(&batch)
            .map_err(|e| CacheError::Arrow {
                path: location.to_path_buf(),
                source: arrow::error::ArrowError::ParseError(e.to_string()),
            })?
            .ok_or_else(|| CacheError::NoKeyColumn(location.to_path_buf()))?;

        log_operation_complete("read", &location.display(), table.num_rows(), Some(start.elapsed()));
        Ok(table)
    }

    /// Column types recorded beside a snapshot; `None` for snapshots without them
    async fn read_schema(
        &self,
        location: &Path,
    ) -> std::result::Result<Option<csv::SnapshotSchema>, CacheError> {
        let path = schema_location(location);
        if !self.contains(&path).await {
            log::debug!("No recorded schema for {}, inferring types", location.display());
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path).await.map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        csv::decode_schema(&bytes)
            .map(Some)
            .map_err(|source| CacheError::Schema { path, source })
    }

    /// Write a snapshot, replacing any existing one
    pub async fn write(
        &self,
        location: &Path,
        table: &KeyedTable,
    ) -> std::result::Result<(), CacheError> {
        if let Some(dir) = location.parent() {
            // An existing directory is not an error; a real problem surfaces on write
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                log::debug!("Could not create cache directory {}: {e}", dir.display());
            }
        }

        let bytes = csv::encode_table(table).map_err(|source| CacheError::Arrow {
            path: location.to_path_buf(),
            source,
        })?;
        let schema_path = schema_location(location);
        let schema = csv::encode_schema(table).map_err(|source| CacheError::Schema {
            path: schema_path.clone(),
            source,
        })?;

        // The snapshot goes last: its presence marks the entry complete
        write_replacing(&schema_path, &schema).await?;
        write_replacing(location, &bytes).await?;

        log::debug!("Cached {} rows at {}", table.num_rows(), location.display());
        Ok(())
    }

    /// Return the snapshot at `location`, or produce, store and return the table
    ///
    /// The producer is not invoked when a snapshot exists and no refresh is
    /// forced. Producer errors propagate unchanged.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        location: &Path,
        producer: F,
        force_refresh: bool,
    ) -> Result<T>
    where
        T: From<KeyedTable> + AsRef<KeyedTable>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !force_refresh && self.contains(location).await {
            return Ok(T::from(self.read(location).await?));
        }

        let value = producer().await?;
        self.write(location, value.as_ref()).await?;
        Ok(value)
    }

    /// [`TableCache::get_or_fetch`] for many tables at once
    ///
    /// Items run concurrently; a failing item is recorded in the outcome and
    /// the remaining items still complete.
    pub async fn get_or_fetch_batch<T, F, Fut>(
        &self,
        keys: Vec<TableKey>,
        producer: F,
        force_refresh: bool,
        progress: Option<&ProgressBar>,
    ) -> BatchOutcome<TableKey, T>
    where
        T: From<KeyedTable> + AsRef<KeyedTable>,
        F: Fn(TableKey) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let producer = &producer;
        run_batch(keys, self.concurrency, progress, move |key| async move {
            let location = self.location(&key);
            self.get_or_fetch(&location, || producer(key), force_refresh)
                .await
        })
        .await
    }

    /// Read a snapshot, mapping its absence to an error for `key`
    pub async fn read_key(&self, key: &TableKey) -> Result<KeyedTable> {
        self.read(&self.location(key)).await.map_err(Error::from)
    }
}
