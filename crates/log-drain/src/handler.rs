// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request handling for the drain endpoint.
//!
//! `POST /<destination>` streams the body through the line framer and the entry parser and
//! appends every entry to the destination's sink. `GET /` is a liveness probe.

use bytes::Bytes;
use hyper::{http::HeaderMap, Method, Request, StatusCode};
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tracing::{debug, error};

use crate::ansi::strip_ansi;
use crate::config::Config;
use crate::entry::EntryParser;
use crate::error::IngestError;
use crate::framer::{body_reader, LineFramer};
use crate::http_utils::{self, log_and_create_http_response, HttpResponse};
use crate::registry::SinkRegistry;
use crate::sink::Sink;

const WRONG_METHOD_MESSAGE: &str = "The only accepted request method is POST";
const MISSING_DESTINATION_MESSAGE: &str = "Request path must specify the log group name";
const INVALID_DESTINATION_MESSAGE: &str = "Request path is not valid UTF-8";

/// Percent-decoded request path without its leading `/`. `None` when it does not decode to
/// UTF-8.
fn destination_from_path(path: &str) -> Option<String> {
    let raw = path.strip_prefix('/').unwrap_or(path);
    urlencoding::decode(raw).ok().map(|decoded| decoded.to_string())
}

/// Failure details go to the log only; the client gets an empty 500.
fn internal_error() -> HttpResponse {
    http_utils::create_http_response(Bytes::new(), StatusCode::INTERNAL_SERVER_ERROR)
}

pub struct IngestionHandler {
    registry: Arc<SinkRegistry>,
    parser: Arc<dyn EntryParser>,
    user: String,
    pass: String,
    strip_ansi_codes: bool,
}

impl IngestionHandler {
    pub fn new(
        registry: Arc<SinkRegistry>,
        parser: Arc<dyn EntryParser>,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            parser,
            user: user.into(),
            pass: pass.into(),
            strip_ansi_codes: false,
        }
    }

    pub fn from_config(
        config: &Config,
        registry: Arc<SinkRegistry>,
        parser: Arc<dyn EntryParser>,
    ) -> Self {
        Self::new(registry, parser, config.user.as_str(), config.pass.as_str())
            .with_ansi_stripping(config.strip_ansi_codes)
    }

    #[must_use]
    pub fn with_ansi_stripping(mut self, enabled: bool) -> Self {
        self.strip_ansi_codes = enabled;
        self
    }

    /// Handles one request to completion. Never fails: every outcome maps to a response.
    pub async fn handle<B>(&self, req: Request<B>) -> HttpResponse
    where
        B: hyper::body::Body<Data = Bytes> + Send + Unpin,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!("{method} {path}");

        if method == Method::GET || method == Method::HEAD {
            return if path == "/" {
                http_utils::create_http_response("OK", StatusCode::OK)
            } else {
                http_utils::create_http_response("Not found", StatusCode::NOT_FOUND)
            };
        }
        if method != Method::POST {
            return log_and_create_http_response(WRONG_METHOD_MESSAGE, StatusCode::BAD_REQUEST);
        }
        let Some(destination) = destination_from_path(&path) else {
            return log_and_create_http_response(
                INVALID_DESTINATION_MESSAGE,
                StatusCode::BAD_REQUEST,
            );
        };
        if destination.is_empty() {
            return log_and_create_http_response(
                MISSING_DESTINATION_MESSAGE,
                StatusCode::BAD_REQUEST,
            );
        }
        if !self.authorized(req.headers()) {
            return log_and_create_http_response(
                &format!("Rejected request for {destination}: invalid credentials"),
                StatusCode::FORBIDDEN,
            );
        }

        let sink = match self.registry.get_or_create(&destination).await {
            Ok(sink) => sink,
            Err(e) => {
                error!("Error creating sink for {destination}: {e}");
                return internal_error();
            }
        };

        let reader = body_reader(req.into_body());
        match self.process_messages(sink.as_ref(), reader).await {
            Ok(count) => {
                debug!("Forwarded {count} entries to {destination}");
                http_utils::create_http_response(Bytes::new(), StatusCode::ACCEPTED)
            }
            Err(e) => {
                error!("Error processing messages for {destination}: {e}");
                internal_error()
            }
        }
    }

    /// An empty configured user or password rejects every request.
    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.user.is_empty() || self.pass.is_empty() {
            return false;
        }
        let Some(credentials) = http_utils::basic_auth(headers) else {
            return false;
        };
        // evaluate both so a wrong user costs the same as a wrong password
        let user_ok = http_utils::constant_time_eq(credentials.user.as_bytes(), self.user.as_bytes());
        let pass_ok = http_utils::constant_time_eq(credentials.pass.as_bytes(), self.pass.as_bytes());
        user_ok & pass_ok
    }

    /// Frames `reader` into lines and appends each parsed entry to `sink`, in order. Stops at the
    /// first failure; entries appended before it stay appended. Returns the number of entries
    /// forwarded.
    pub async fn process_messages<R>(&self, sink: &dyn Sink, reader: R) -> Result<usize, IngestError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut framer = LineFramer::new(reader);
        let mut count = 0;

        while let Some(line) = framer.next_line().await? {
            let mut entry = self
                .parser
                .parse(&line.bytes)
                .map_err(|source| IngestError::Parse {
                    line: String::from_utf8_lossy(&line.bytes).into_owned(),
                    source,
                })?;

            if self.strip_ansi_codes {
                if let std::borrow::Cow::Owned(stripped) = strip_ansi(&entry.message) {
                    entry.message = stripped;
                }
            }
            if line.terminated && entry.message.ends_with('\n') {
                entry.message.pop();
            }

            sink.append(entry).await?;
            count += 1;
        }

        Ok(count)
    }
}
