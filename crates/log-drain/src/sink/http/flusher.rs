// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shipping of encoded batches to the log-group intake.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING};
use reqwest::{Response, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// How a batch is retried when the intake answers with a 5xx or cannot be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Up to `n` attempts back to back.
    Immediate(u64),
    /// Up to `n` attempts, sleeping `attempt * delay_ms` milliseconds between them.
    LinearBackoff(u64, u64),
}

impl RetryStrategy {
    fn max_attempts(&self) -> u64 {
        match self {
            Self::Immediate(attempts) | Self::LinearBackoff(attempts, _) => (*attempts).max(1),
        }
    }

    fn delay_after(&self, attempt: u64) -> Option<Duration> {
        match self {
            Self::Immediate(_) => None,
            Self::LinearBackoff(_, delay_ms) => Some(Duration::from_millis(attempt * delay_ms)),
        }
    }
}

#[derive(Debug)]
pub(crate) enum ShippingError {
    Destination(Option<StatusCode>, String),
}

#[derive(Debug, Clone)]
pub(crate) struct Flusher {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    timeout: Duration,
    retry_strategy: RetryStrategy,
    compression_level: Option<i32>,
}

impl Flusher {
    pub(crate) fn new(
        client: reqwest::Client,
        url: String,
        mut headers: HeaderMap,
        timeout: Duration,
        retry_strategy: RetryStrategy,
        compression_level: Option<i32>,
    ) -> Self {
        if compression_level.is_some() {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }
        Self {
            client,
            url,
            headers,
            timeout,
            retry_strategy,
            compression_level,
        }
    }

    /// Sends one batch, retrying transient failures. Failures are logged; the batch is dropped
    /// once the retry budget is spent.
    pub(crate) async fn flush(&self, batch: Vec<u8>) -> bool {
        let body = match self.encode(batch) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to compress payload for {}. Data dropped: {e}", self.url);
                return false;
            }
        };

        let max_attempts = self.retry_strategy.max_attempts();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let start = Instant::now();
            let result = self.send(body.clone()).await;
            let elapsed = start.elapsed();

            match result {
                Ok(()) => {
                    debug!(
                        "Shipped {} bytes to {} in {} ms",
                        body.len(),
                        self.url,
                        elapsed.as_millis()
                    );
                    return true;
                }
                Err(ShippingError::Destination(Some(status), msg)) if status.is_client_error() => {
                    error!("{status}: intake rejected batch for {}, dropping it: {msg}", self.url);
                    return false;
                }
                Err(e) => {
                    if attempts >= max_attempts {
                        error!(
                            "Failed to ship batch to {} after {} attempts: {e:?}",
                            self.url, attempts
                        );
                        return false;
                    }
                    debug!("Attempt {attempts} to ship batch to {} failed: {e:?}", self.url);
                    if let Some(delay) = self.retry_strategy.delay_after(attempts) {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn send(&self, body: Vec<u8>) -> Result<(), ShippingError> {
        let response: Response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| ShippingError::Destination(e.status(), e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(ShippingError::Destination(Some(status), text))
    }

    fn encode(&self, batch: Vec<u8>) -> std::io::Result<Vec<u8>> {
        match self.compression_level {
            None => Ok(batch),
            Some(level) => zstd::stream::encode_all(batch.as_slice(), level),
        }
    }
}
