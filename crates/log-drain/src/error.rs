// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

/// Errors produced while turning one raw line into a [`crate::entry::LogEntry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty log line")]
    Empty,

    #[error("invalid octet count prefix")]
    InvalidOctetCount,

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("missing {0} field")]
    MissingField(&'static str),

    #[error("non-ascii bytes in {0} field")]
    NonAscii(&'static str),
}

/// Errors reported by a sink or by the factory constructing it.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to create log group {name}: {reason}")]
    Creation { name: String, reason: String },

    #[error("sink for {0} is closed")]
    Closed(String),

    #[error("failed to build intake client: {0}")]
    Client(String),

    #[error("intake request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors returned by [`crate::registry::SinkRegistry::get_or_create`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("{0}")]
    Creation(Arc<SinkError>),

    #[error("sink creation previously failed: {0}")]
    CachedFailure(Arc<SinkError>),
}

/// Errors that abort the processing of a single ingestion request.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to scan request body: {0}")]
    Read(#[from] std::io::Error),

    #[error("unable to parse message: {line:?}, error: {source}")]
    Parse {
        line: String,
        #[source]
        source: ParseError,
    },

    #[error("failed to append entry: {0}")]
    Append(#[from] SinkError),
}

/// Errors raised while loading the process configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("{0} environment variable is not set")]
    Missing(&'static str),
}

/// Errors reported by the drain controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrainError {
    #[error("Shutdown timeout exceeded with {0} sink close(s) still pending")]
    Timeout(usize),
}
