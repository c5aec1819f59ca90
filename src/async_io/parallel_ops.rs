//! Concurrent batches with a partial-result contract
//!
//! A batch runs one task per key. A failing task never cancels its siblings:
//! its error is recorded next to the key and the rest of the batch carries on.

use std::fmt::Display;
use std::future::Future;

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;

use crate::error::{Error, Result};
use crate::utils::logging::log_warning;

/// Successes and failures of one batch, both in request order
#[derive(Debug)]
pub struct BatchOutcome<K, T> {
    pub succeeded: Vec<(K, T)>,
    pub failed: Vec<(K, Error)>,
}

impl<K, T> Default for BatchOutcome<K, T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<K, T> BatchOutcome<K, T> {
    /// Number of items that were requested
    #[must_use]
    pub fn requested(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Keys whose task failed
    pub fn failed_keys(&self) -> impl Iterator<Item = &K> {
        self.failed.iter().map(|(k, _)| k)
    }

    /// Keys whose task succeeded
    pub fn succeeded_keys(&self) -> impl Iterator<Item = &K> {
        self.succeeded.iter().map(|(k, _)| k)
    }

    /// Keep the successful values and drop the failures
    #[must_use]
    pub fn into_values(self) -> Vec<T> {
        self.succeeded.into_iter().map(|(_, v)| v).collect()
    }

    /// Successful values, or the first failure if there was any
    pub fn into_strict(self) -> Result<Vec<T>> {
        match self.failed.into_iter().next() {
            Some((_, error)) => Err(error),
            None => Ok(self.succeeded.into_iter().map(|(_, v)| v).collect()),
        }
    }
}

/// Run `task` for every key with at most `concurrency` tasks in flight
///
/// Failures are logged and collected; they never stop the batch.
pub async fn run_batch<K, T, F, Fut>(
    keys: Vec<K>,
    concurrency: usize,
    progress: Option<&ProgressBar>,
    task: F,
) -> BatchOutcome<K, T>
where
    K: Clone + Display,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let task = &task;
    let mut results = stream::iter(keys.into_iter().enumerate())
        .map(move |(i, key)| async move {
            let result = task(key.clone()).await;
            (i, key, result)
        })
        .buffer_unordered(concurrency.max(1))
        .inspect(|_| {
            if let Some(pb) = progress {
                pb.inc(1);
            }
        })
        .collect::<Vec<_>>()
        .await;

    results.sort_by_key(|(i, _, _)| *i);

    let mut outcome = BatchOutcome::default();
    for (_, key, result) in results {
        match result {
            Ok(value) => outcome.succeeded.push((key, value)),
            Err(error) => {
                log_warning(&format!("Dropping {key} from batch ({error})"), None);
                outcome.failed.push((key, error));
            }
        }
    }
    outcome
}
