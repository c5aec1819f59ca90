//! Raw payload retrieval
//!
//! The fetcher never inspects transport errors itself: a [`Retriever`] reports
//! the kind of failure it saw and the fetcher maps that kind to a reason.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Kind of a failed retrieval, as observed by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalErrorKind {
    /// The resource does not exist (404 / 410)
    NotFound,
    /// Any other error status
    Status(u16),
    /// The request did not complete in time
    Timeout,
    /// The connection could not be made or broke off
    Connect,
}

/// A failed retrieval of one location
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} ({url})")]
pub struct RetrievalError {
    pub kind: RetrievalErrorKind,
    pub url: String,
    pub message: String,
}

impl RetrievalError {
    pub fn new(kind: RetrievalErrorKind, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Capability to fetch the bytes stored at a location
pub trait Retriever: Send + Sync {
    fn get(
        &self,
        url: &str,
    ) -> impl Future<Output = std::result::Result<Vec<u8>, RetrievalError>> + Send;
}

impl<R: Retriever> Retriever for Arc<R> {
    fn get(
        &self,
        url: &str,
    ) -> impl Future<Output = std::result::Result<Vec<u8>, RetrievalError>> + Send {
        self.as_ref().get(url)
    }
}

/// HTTP retriever backed by `reqwest`, with an explicit per-request timeout
#[derive(Debug, Clone)]
pub struct ReqwestRetriever {
    client: reqwest::Client,
}

impl ReqwestRetriever {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn transport_error(url: &str, error: &reqwest::Error) -> RetrievalError {
    let kind = if error.is_timeout() {
        RetrievalErrorKind::Timeout
    } else if let Some(status) = error.status() {
        status_kind(status.as_u16())
    } else {
        RetrievalErrorKind::Connect
    };
    RetrievalError::new(kind, url, error.to_string())
}

const fn status_kind(status: u16) -> RetrievalErrorKind {
    match status {
        404 | 410 => RetrievalErrorKind::NotFound,
        other => RetrievalErrorKind::Status(other),
    }
}

impl Retriever for ReqwestRetriever {
    async fn get(&self, url: &str) -> std::result::Result<Vec<u8>, RetrievalError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::new(
                status_kind(status.as_u16()),
                url,
                format!("HTTP {status}"),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(url, &e))?;
        Ok(body.to_vec())
    }
}
