// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hyper::service::service_fn;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handler::IngestionHandler;

/// HTTP/1.1 front end of the drain. One task per connection.
pub struct DrainServer {
    listener: TcpListener,
    handler: Arc<IngestionHandler>,
    grace_period: Duration,
}

impl DrainServer {
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<IngestionHandler>,
        grace_period: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handler,
            grace_period,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until `shutdown` is cancelled. Then stops accepting, lets in-flight
    /// requests finish for up to the grace period, and aborts whatever is still running.
    pub async fn serve(self, shutdown: CancellationToken) -> io::Result<()> {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = JoinSet::new();
        info!("Log drain listening on {}", self.listener.local_addr()?);

        loop {
            let conn = tokio::select! {
                con_res = self.listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e);
                    }
                    Ok((conn, peer)) => {
                        debug!("Accepted connection from {peer}");
                        conn
                    }
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
                _ = shutdown.cancelled() => break,
            };

            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let handler = Arc::clone(&self.handler);
            let shutdown = shutdown.clone();
            joinset.spawn(async move {
                let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let handler = Arc::clone(&handler);
                    async move { Ok::<_, Infallible>(handler.handle(req).await) }
                });
                let conn = server.serve_connection(conn, service);
                tokio::pin!(conn);

                let mut draining = false;
                loop {
                    tokio::select! {
                        res = conn.as_mut() => {
                            if let Err(e) = res {
                                debug!("Connection error: {e}");
                            }
                            break;
                        }
                        _ = shutdown.cancelled(), if !draining => {
                            // finish the current request, then close
                            conn.as_mut().graceful_shutdown();
                            draining = true;
                        }
                    }
                }
            });
        }

        drop(self.listener);
        info!(
            "Stopped accepting connections, waiting up to {:?} for {} in-flight connection(s)",
            self.grace_period,
            joinset.len()
        );
        let drained = tokio::time::timeout(self.grace_period, async {
            while joinset.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Grace period expired, aborting {} connection(s)",
                joinset.len()
            );
            joinset.abort_all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogplexParser;
    use crate::registry::{CreationFailurePolicy, SinkRegistry};
    use crate::sink::memory::MemorySinkFactory;
    use crate::sink::SinkFactory;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start() -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<io::Result<()>>) {
        let factory: Arc<dyn SinkFactory> = Arc::new(MemorySinkFactory::new());
        let registry = Arc::new(SinkRegistry::new(factory, CreationFailurePolicy::default()));
        let handler = Arc::new(IngestionHandler::new(
            registry,
            Arc::new(LogplexParser),
            "drain",
            "s3cret",
        ));
        let server = DrainServer::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            handler,
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.serve(shutdown.clone()));
        (addr, shutdown, handle)
    }

    #[tokio::test]
    async fn test_probe_over_socket() {
        let (addr, shutdown, handle) = start().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("OK"));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (addr, shutdown, handle) = start().await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_shutdown() {
        let (addr, shutdown, handle) = start().await;

        // keep-alive connection that never sends a request
        let _idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
