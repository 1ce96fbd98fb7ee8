// Sender - delivers one snapshot to the collector server
//
// The snapshot goes out as a single gzip-compressed JSON batch. If the batch
// cannot be delivered within the retry budget, every sample is sent on its own
// so one bad metric does not hold back the rest.

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::collector::Snapshot;
use crate::crypto::{self, HASH_HEADER};
use crate::model::MetricSample;
use crate::retry::{self, DefaultErrorClassifier, ErrorClassifier, RetryError, RetryPolicy};

const BATCH_PATH: &str = "/updates/";
const SINGLE_PATH: &str = "/update";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur while delivering metrics
#[derive(Error, Debug)]
pub enum SendError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to compress metrics: {0}")]
    Compress(#[source] std::io::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Display carries the canonical status line, e.g. "503 Service Unavailable"
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(StatusCode),

    #[error("delivery cancelled")]
    Cancelled,

    #[error("{failed} of {total} metrics could not be delivered")]
    Partial { failed: usize, total: usize },
}

/// HTTP client for the collector's update endpoints
pub struct MetricsSender {
    client: reqwest::Client,
    server_url: String,
    key: Option<String>,
    policy: RetryPolicy,
    classifier: Arc<dyn ErrorClassifier>,
}

impl MetricsSender {
    /// Creates a sender with the default retry policy and classifier
    ///
    /// # Arguments
    /// * `server_url` - Base URL of the collector, e.g. `http://localhost:8080`
    /// * `key` - Shared secret for the `HashSHA256` header, if any
    pub fn new(server_url: impl Into<String>, key: Option<String>) -> Result<Self, SendError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(MetricsSender {
            client,
            server_url: server_url.into().trim_end_matches('/').to_string(),
            key,
            policy: RetryPolicy::default(),
            classifier: Arc::new(DefaultErrorClassifier),
        })
    }

    pub fn with_retry(mut self, policy: RetryPolicy, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.policy = policy;
        self.classifier = classifier;
        self
    }

    /// Delivers a snapshot, degrading to per-sample requests on batch failure
    ///
    /// # Returns
    /// * `Ok(())` - Batch accepted, or every single sample accepted
    /// * `Err(SendError::Cancelled)` - Shutdown interrupted delivery
    /// * `Err(SendError::Partial)` - Fallback ran but some samples failed
    #[instrument(skip_all, fields(poll_count = snapshot.poll_count))]
    pub async fn send_metrics(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        let samples = snapshot.samples();
        if samples.is_empty() {
            debug!("Empty snapshot, nothing to send");
            return Ok(());
        }

        let json = serde_json::to_vec(&samples)?;
        let batch = retry::execute(cancel, &self.policy, self.classifier.as_ref(), || {
            self.post(BATCH_PATH, &json)
        })
        .await;

        match batch {
            Ok(()) => {
                info!(count = samples.len(), "Batch metrics sent");
                return Ok(());
            }
            Err(RetryError::Cancelled) => return Err(SendError::Cancelled),
            Err(e) => warn!(
                error = %e,
                "Batch send failed, falling back to individual requests"
            ),
        }

        self.send_individually(&samples, cancel).await
    }

    async fn send_individually(
        &self,
        samples: &[MetricSample],
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        let mut failed = 0;

        for sample in samples {
            let json = serde_json::to_vec(sample)?;
            let result = retry::execute(cancel, &self.policy, self.classifier.as_ref(), || {
                self.post(SINGLE_PATH, &json)
            })
            .await;

            match result {
                Ok(()) => {}
                Err(RetryError::Cancelled) => return Err(SendError::Cancelled),
                Err(e) => {
                    failed += 1;
                    error!(metric = %sample.id, error = %e, "Failed to send metric after retries");
                }
            }
        }

        if failed > 0 {
            return Err(SendError::Partial {
                failed,
                total: samples.len(),
            });
        }

        info!(count = samples.len(), "Metrics sent individually");
        Ok(())
    }

    /// One HTTP exchange: compress, sign, POST, require 200
    async fn post(&self, path: &str, json: &[u8]) -> Result<(), SendError> {
        let body = compress(json).map_err(SendError::Compress)?;

        let mut request = self
            .client
            .post(format!("{}{}", self.server_url, path))
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(ACCEPT_ENCODING, "gzip")
            .body(body);

        if let Some(key) = &self.key {
            request = request.header(HASH_HEADER, crypto::sign(json, key));
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(SendError::UnexpectedStatus(status));
        }
        Ok(())
    }
}

fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
