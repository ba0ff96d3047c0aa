//! Batch delivery with retry and bounded concurrency.
//!
//! [`Transport`] performs exactly one delivery attempt. [`Uploader`] wraps a
//! transport with the retry policy and the upload slot semaphore:
//!
//! - Retryable failures (transport errors, timeouts, 5xx, 408, 429) are retried with
//!   exponential backoff, up to `max_retries` extra attempts.
//! - Rejections (other 4xx) and encoding failures end the batch immediately.
//! - At most `upload_concurrency` deliveries hold a slot at any time.

mod http;

pub use http::{HttpTransport, JsonBatch, JsonFrame};

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{RetryPolicy, StreamConfig};
use crate::types::{BackendResponse, Batch, UploadFailureKind, UploadResult};
use crate::{Result, StreamError};

/// One delivery attempt to the backend.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver a batch once
    ///
    /// Returns the backend response for 2xx statuses. Every other status must be
    /// reported through [`classify_status`] so retry decisions stay consistent.
    async fn post_batch(&self, session_id: Uuid, batch: &Batch) -> Result<BackendResponse>;

    /// Check the backend is reachable
    async fn probe(&self) -> Result<()>;
}

/// Map an HTTP status and body to a delivery outcome.
///
/// 2xx succeeds; 408, 429 and 5xx are retryable network errors; any other
/// status is a permanent rejection.
pub fn classify_status(status: u16, body: String) -> Result<BackendResponse> {
    match status {
        200..=299 => Ok(BackendResponse::new(status, body)),
        408 | 429 | 500..=599 => {
            Err(StreamError::network(format!("backend returned {status}: {}", truncate(&body))))
        }
        _ => Err(StreamError::endpoint_rejection(status, truncate(&body))),
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 256;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Delivers sealed batches with retry and a concurrency limit.
#[derive(Clone)]
pub struct Uploader {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    slots: Arc<Semaphore>,
    concurrency: usize,
}

impl Uploader {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self { transport, policy, slots: Arc::new(Semaphore::new(concurrency)), concurrency }
    }

    /// Uploader using the retry and concurrency settings of `config`
    pub fn from_config(transport: Arc<dyn Transport>, config: &StreamConfig) -> Self {
        Self::new(transport, config.retry_policy(), config.upload_concurrency)
    }

    /// Wait for a free upload slot
    pub async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| StreamError::invalid_state("acquire an upload slot", "closed"))
    }

    /// Slots not currently held by a delivery
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver a batch, retrying retryable failures with backoff.
    ///
    /// Never fails: the outcome, including exhausted retries, is in the result.
    pub async fn send(&self, session_id: Uuid, batch: &Batch) -> UploadResult {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.transport.post_batch(session_id, batch).await {
                Ok(response) => {
                    debug!(
                        first = batch.first_sequence(),
                        frames = batch.len(),
                        attempt,
                        status = response.status,
                        "Batch delivered"
                    );
                    return UploadResult::Delivered { attempts: attempt, response };
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    if !retryable || attempt >= max_attempts {
                        warn!(
                            first = batch.first_sequence(),
                            frames = batch.len(),
                            attempts = attempt,
                            retryable,
                            "Batch failed: {}",
                            err
                        );
                        return UploadResult::Failed {
                            attempts: attempt,
                            kind: UploadFailureKind::classify(&err),
                            retryable,
                            message: err.to_string(),
                        };
                    }

                    let delay = self.policy.backoff(attempt);
                    debug!(
                        first = batch.first_sequence(),
                        attempt,
                        max_attempts,
                        ?delay,
                        "Retrying batch: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingTransport, Reply, batch_of};
    use std::time::Duration;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        }
    }

    #[test]
    fn statuses_classify_for_retry() {
        assert!(classify_status(200, String::new()).is_ok());
        assert!(classify_status(204, String::new()).is_ok());
        assert!(classify_status(503, String::new()).unwrap_err().is_retryable());
        assert!(classify_status(429, String::new()).unwrap_err().is_retryable());
        assert!(classify_status(408, String::new()).unwrap_err().is_retryable());

        let rejected = classify_status(400, "No image part in the request".into()).unwrap_err();
        assert!(!rejected.is_retryable());
        assert!(matches!(rejected, StreamError::EndpointRejection { status: 400, .. }));
        assert!(!classify_status(302, String::new()).unwrap_err().is_retryable());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let err = classify_status(413, body).unwrap_err();
        assert!(err.to_string().len() < 400);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_uses_exactly_k_plus_one_attempts() {
        for k in [0u32, 1, 3] {
            let transport = Arc::new(RecordingTransport::always(Reply::Status(503)));
            let uploader = Uploader::new(transport.clone(), policy(k), 1);

            let result = uploader.send(Uuid::new_v4(), &batch_of(0, 2)).await;
            assert!(!result.is_delivered());
            assert_eq!(result.attempts(), k + 1);
            assert_eq!(transport.attempts(), (k + 1) as usize);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_not_retried() {
        let transport = Arc::new(RecordingTransport::always(Reply::Status(422)));
        let uploader = Uploader::new(transport.clone(), policy(3), 1);

        let result = uploader.send(Uuid::new_v4(), &batch_of(0, 1)).await;
        match result {
            UploadResult::Failed { attempts, kind, retryable, .. } => {
                assert_eq!(attempts, 1);
                assert!(!retryable);
                assert_eq!(kind, UploadFailureKind::EndpointRejection { status: 422 });
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let transport = Arc::new(RecordingTransport::scripted(vec![
            Reply::Network,
            Reply::Status(500),
            Reply::Status(200),
        ]));
        let uploader = Uploader::new(transport.clone(), policy(3), 1);

        let started = tokio::time::Instant::now();
        let result = uploader.send(Uuid::new_v4(), &batch_of(0, 3)).await;
        assert!(result.is_delivered());
        assert_eq!(result.attempts(), 3);

        // 10ms then 20ms of backoff
        assert_eq!(started.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn frames_reach_transport_in_order() {
        let transport = Arc::new(RecordingTransport::always(Reply::Status(200)));
        let uploader = Uploader::new(transport.clone(), policy(0), 1);

        uploader.send(Uuid::new_v4(), &batch_of(10, 4)).await;
        assert_eq!(transport.delivered_sequences(), vec![vec![10, 11, 12, 13]]);
    }

    #[test]
    fn from_config_takes_retry_and_concurrency_settings() {
        let mut config = StreamConfig::new("http://backend.test/upload");
        config.max_retries = 5;
        config.upload_concurrency = 0;

        let transport = Arc::new(RecordingTransport::always(Reply::Status(200)));
        let uploader = Uploader::from_config(transport, &config);
        assert_eq!(uploader.policy().max_attempts(), 6);
        assert_eq!(uploader.concurrency(), 1);
        assert_eq!(uploader.available_slots(), 1);
    }

    #[tokio::test]
    async fn slots_bound_concurrency() {
        let transport = Arc::new(RecordingTransport::always(Reply::Status(200)));
        let uploader = Uploader::new(transport, policy(0), 2);

        let first = uploader.acquire_slot().await.expect("slot");
        let _second = uploader.acquire_slot().await.expect("slot");
        assert_eq!(uploader.available_slots(), 0);

        drop(first);
        assert_eq!(uploader.available_slots(), 1);
    }
}
