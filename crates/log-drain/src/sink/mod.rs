// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destinations for parsed log entries.
//!
//! A [`Sink`] accepts entries for exactly one destination and flushes them downstream. Sinks are
//! built by a [`SinkFactory`] chosen at startup: [`http::HttpSinkFactory`] ships to a log-group
//! intake service, [`memory::MemorySinkFactory`] keeps everything in memory for tests.

use async_trait::async_trait;
use std::sync::Arc;

use crate::entry::LogEntry;
use crate::error::SinkError;

pub mod http;
pub mod memory;

#[async_trait]
pub trait Sink: Send + Sync {
    /// Hands one entry to the sink. Must be safe to call concurrently from several requests.
    async fn append(&self, entry: LogEntry) -> Result<(), SinkError>;

    /// Flushes everything buffered and releases the sink. Calling it more than once is a no-op.
    async fn close(&self) -> Result<(), SinkError>;
}

#[async_trait]
pub trait SinkFactory: Send + Sync {
    /// Builds the sink for the destination `name`.
    async fn create(&self, name: &str) -> Result<Arc<dyn Sink>, SinkError>;
}
