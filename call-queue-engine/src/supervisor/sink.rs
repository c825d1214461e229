//! Backend result sink: the single path by which a [`CallResult`] is
//! reported upstream. POSTs are idempotent on `call_id`; the backend is
//! expected to deduplicate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::job::CallResult;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("transient sink error: {0}")]
    Transient(String),
    #[error("permanent sink error: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Where a reconciled [`CallResult`] is delivered. A trait so tests can
/// substitute an in-memory sink without making real HTTP calls.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn deliver(&self, result: &CallResult) -> Result<(), SinkError>;
}

#[derive(Clone)]
pub struct BackendSink {
    client: Client,
    url: String,
}

impl BackendSink {
    pub fn new(url: String, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client builds with static config");
        Self { client, url }
    }
}

#[async_trait]
impl ResultSink for BackendSink {
    /// Deliver one result. The backend is expected to treat repeat
    /// deliveries of the same `call_id` as a no-op.
    async fn deliver(&self, result: &CallResult) -> Result<(), SinkError> {
        let res = self
            .client
            .post(&self.url)
            .json(result)
            .send()
            .await
            .map_err(|e| SinkError::Transient(format!("sink request failed: {e}")))?;

        let status = res.status();
        if status.is_client_error() {
            return Err(SinkError::Permanent(format!("sink returned {status}")));
        }
        if !status.is_success() {
            return Err(SinkError::Transient(format!("sink returned {status}")));
        }
        Ok(())
    }
}
