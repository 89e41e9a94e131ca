// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, http::HeaderMap, Response, StatusCode};
use tracing::{debug, error, warn};

pub type HttpResponse = Response<Full<Bytes>>;

/// Does two things:
/// 1. Logs the given message. A success status code (within 200-299) will cause a debug log to
///    be written, a client error a warning, anything else an error.
/// 2. Returns the given message as the plain text body of a response with the given status code.
pub fn log_and_create_http_response(message: &str, status: StatusCode) -> HttpResponse {
    if status.is_success() {
        debug!("{message}");
    } else if status.is_client_error() {
        warn!("{message}");
    } else {
        error!("{message}");
    }
    create_http_response(message.to_string(), status)
}

/// Builds a plain text response without logging.
pub fn create_http_response(body: impl Into<Bytes>, status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Credentials carried by an `Authorization: Basic ...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub user: String,
    pub pass: String,
}

/// Extracts basic auth credentials from the request headers. Returns `None` when the header is
/// absent, uses another scheme, or does not decode to `user:pass`.
pub fn basic_auth(header_map: &HeaderMap) -> Option<BasicCredentials> {
    let value = header_map.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    // the password may itself contain ':'
    let (user, pass) = decoded.split_once(':')?;
    Some(BasicCredentials {
        user: user.to_string(),
        pass: pass.to_string(),
    })
}

/// Compares two byte strings in time that depends only on their lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
