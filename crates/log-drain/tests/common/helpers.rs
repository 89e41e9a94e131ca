// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use log_drain::{
    entry::LogplexParser,
    handler::IngestionHandler,
    registry::{CreationFailurePolicy, SinkRegistry},
    server::DrainServer,
    sink::SinkFactory,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const USER: &str = "drain";
pub const PASS: &str = "s3cret";

/// A drain server running on an ephemeral port.
pub struct RunningDrain {
    pub addr: SocketAddr,
    pub registry: Arc<SinkRegistry>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl RunningDrain {
    /// Cancels the server and waits for the accept loop to finish.
    pub async fn stop(self) -> Arc<SinkRegistry> {
        self.shutdown.cancel();
        self.handle
            .await
            .expect("server task panicked")
            .expect("server failed");
        self.registry
    }
}

/// Starts a drain server with a logplex parser in front of `factory`.
pub async fn start_drain(factory: Arc<dyn SinkFactory>, strip_ansi: bool) -> RunningDrain {
    let registry = Arc::new(SinkRegistry::new(factory, CreationFailurePolicy::default()));
    let handler = Arc::new(
        IngestionHandler::new(Arc::clone(&registry), Arc::new(LogplexParser), USER, PASS)
            .with_ansi_stripping(strip_ansi),
    );
    let server = DrainServer::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        handler,
        Duration::from_secs(1),
    )
    .await
    .expect("failed to bind drain server");
    let addr = server.local_addr().expect("no local address");
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.serve(shutdown.clone()));

    RunningDrain {
        addr,
        registry,
        shutdown,
        handle,
    }
}

pub fn basic_auth(user: &str, pass: &str) -> String {
    format!(
        "Basic {}",
        general_purpose::STANDARD.encode(format!("{user}:{pass}"))
    )
}

/// Send an HTTP request over TCP and return the status and body
pub async fn send_tcp_request(
    addr: SocketAddr,
    uri: &str,
    method: &str,
    auth: Option<String>,
    body: &str,
) -> Result<(StatusCode, String), Box<dyn std::error::Error>> {
    let stream = timeout(Duration::from_secs(2), tokio::net::TcpStream::connect(addr)).await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Host", addr.to_string())
        .header("Content-Type", "application/logplex-1");
    if let Some(auth) = auth {
        request_builder = request_builder.header("Authorization", auth);
    }
    let request = request_builder.body(Full::new(Bytes::from(body.to_string())))?;

    let response = timeout(Duration::from_secs(2), sender.send_request(request)).await??;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, String::from_utf8(body.to_vec())?))
}

/// Builds a logplex frame for `app[proc]` with an octet count prefix.
pub fn logplex_frame(app: &str, proc_id: &str, message: &str) -> String {
    let frame = format!("<190>1 2024-03-01T10:00:00.250+00:00 host {app} {proc_id} - {message}");
    format!("{} {frame}", frame.len())
}
