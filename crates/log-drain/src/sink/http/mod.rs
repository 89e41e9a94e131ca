// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sink shipping entries to a log-group intake service over HTTP.
//!
//! Creating a sink registers the log group with the intake:
//!
//! ```text
//! PUT  {intake}/v1/log-groups/{name}          {"retention_in_days": 7}
//! POST {intake}/v1/log-groups/{name}/entries  [{"timestamp": 1700000000123, "message": "..."}]
//! ```
//!
//! `{name}` is percent-encoded as a single path segment. A 409 on creation means the group
//! already exists and is treated as success. Entries are buffered by a per-destination
//! [`service::SinkService`] task and shipped in batches.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::entry::LogEntry;
use crate::error::SinkError;
use crate::sink::{Sink, SinkFactory};

mod batcher;
pub mod flusher;
mod service;

pub use flusher::RetryStrategy;
use flusher::Flusher;
use service::{SinkCommand, SinkService, COMMAND_CHANNEL_CAPACITY};

const API_KEY_HEADER: &str = "X-Api-Key";

/// Settings for talking to the log-group intake.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeConfig {
    /// Base URL, without trailing slash.
    pub url: String,
    pub api_key: Option<String>,
    pub https_proxy: Option<String>,
    /// Retention applied to newly created log groups; 0 leaves the intake default.
    pub retention_days: u32,
    pub flush_interval: Duration,
    /// Timeout of each intake request.
    pub flush_timeout: Duration,
    pub retry_strategy: RetryStrategy,
    /// zstd level, `None` sends batches uncompressed.
    pub compression_level: Option<i32>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            https_proxy: None,
            retention_days: 0,
            flush_interval: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(10),
            retry_strategy: RetryStrategy::LinearBackoff(3, 100),
            compression_level: None,
        }
    }
}

/// Builds a reqwest client with optional proxy configuration and timeout.
fn build_client(proxy_url: Option<&str>, timeout: Duration) -> Result<reqwest::Client, SinkError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = proxy_url {
        let proxy = reqwest::Proxy::https(proxy).map_err(|e| SinkError::Client(e.to_string()))?;
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(|e| SinkError::Client(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct HttpSinkFactory {
    client: reqwest::Client,
    config: Arc<IntakeConfig>,
    headers: HeaderMap,
}

impl HttpSinkFactory {
    pub fn new(config: IntakeConfig) -> Result<Self, SinkError> {
        let client = build_client(config.https_proxy.as_deref(), config.flush_timeout)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = &config.api_key {
            let value = HeaderValue::from_str(api_key)
                .map_err(|_| SinkError::Client("API key is not a valid header value".into()))?;
            headers.insert(API_KEY_HEADER, value);
        }

        Ok(Self {
            client,
            config: Arc::new(config),
            headers,
        })
    }

    fn group_url(&self, name: &str) -> Result<String, SinkError> {
        // dot segments would be resolved by the URL parser, even when percent-encoded
        if name.is_empty() || name == "." || name == ".." {
            return Err(SinkError::Creation {
                name: name.to_string(),
                reason: "invalid log group name".to_string(),
            });
        }
        Ok(format!(
            "{}/v1/log-groups/{}",
            self.config.url.trim_end_matches('/'),
            urlencoding::encode(name)
        ))
    }

    async fn register_group(&self, name: &str, group_url: &str) -> Result<(), SinkError> {
        let retention = (self.config.retention_days > 0).then_some(self.config.retention_days);
        let response = self
            .client
            .put(group_url)
            .headers(self.headers.clone())
            .json(&json!({ "retention_in_days": retention }))
            .send()
            .await
            .map_err(|e| SinkError::Creation {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Creation {
            name: name.to_string(),
            reason: format!("{status}: {body}"),
        })
    }
}

#[async_trait]
impl SinkFactory for HttpSinkFactory {
    async fn create(&self, name: &str) -> Result<Arc<dyn Sink>, SinkError> {
        let group_url = self.group_url(name)?;
        self.register_group(name, &group_url).await?;

        let flusher = Flusher::new(
            self.client.clone(),
            format!("{group_url}/entries"),
            self.headers.clone(),
            self.config.flush_timeout,
            self.config.retry_strategy.clone(),
            self.config.compression_level,
        );
        let (service, tx) = SinkService::new(
            name,
            flusher,
            self.config.flush_interval,
            COMMAND_CHANNEL_CAPACITY,
        );
        tokio::spawn(service.run());

        info!("Created log group sink for {name}");
        Ok(Arc::new(HttpSink {
            name: name.to_string(),
            tx,
        }))
    }
}

/// Handle to the [`SinkService`] of one destination. Cheap to share.
#[derive(Debug)]
pub struct HttpSink {
    name: String,
    tx: mpsc::Sender<SinkCommand>,
}

#[async_trait]
impl Sink for HttpSink {
    async fn append(&self, entry: LogEntry) -> Result<(), SinkError> {
        // waits while the service is busy shipping
        self.tx
            .send(SinkCommand::Append(entry))
            .await
            .map_err(|_| SinkError::Closed(self.name.clone()))
    }

    async fn close(&self) -> Result<(), SinkError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(SinkCommand::Close(ack_tx)).await.is_err() {
            debug!("{}: sink already closed", self.name);
            return Ok(());
        }
        // a dropped ack means the service stopped on an earlier close
        let _ = ack_rx.await;
        Ok(())
    }
}
