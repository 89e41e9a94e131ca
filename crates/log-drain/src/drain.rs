// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shutdown drain: flushes and releases every open sink.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::DrainError;
use crate::registry::SinkRegistry;
use crate::sink::Sink;

/// Outcome of a drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub closed: usize,
    pub failed: usize,
    /// Closes still running when the deadline expired.
    pub abandoned: usize,
}

impl DrainReport {
    pub fn into_result(self) -> Result<DrainReport, DrainError> {
        if self.abandoned > 0 {
            Err(DrainError::Timeout(self.abandoned))
        } else {
            Ok(self)
        }
    }
}

pub struct DrainController {
    registry: Arc<SinkRegistry>,
}

impl DrainController {
    pub fn new(registry: Arc<SinkRegistry>) -> Self {
        Self { registry }
    }

    /// Closes every sink registered at the time of the call, concurrently, and waits for all
    /// of them. With a `deadline`, closes still pending once it elapses are abandoned.
    pub async fn drain(&self, deadline: Option<Duration>) -> DrainReport {
        let sinks = self.registry.all().await;
        info!("Draining {} sink(s)", sinks.len());
        close_all(sinks, deadline).await
    }
}

/// Fans out one close task per sink and joins them all.
pub async fn close_all(sinks: Vec<Arc<dyn Sink>>, deadline: Option<Duration>) -> DrainReport {
    let mut report = DrainReport::default();
    let mut set = JoinSet::new();
    for sink in sinks {
        set.spawn(async move { sink.close().await });
    }

    let deadline = deadline.map(|d| Instant::now() + d);
    loop {
        let joined = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    report.abandoned = set.len();
                    warn!(
                        "Shutdown timeout exceeded, abandoning {} pending sink close(s)",
                        report.abandoned
                    );
                    set.abort_all();
                    break;
                }
            },
            None => set.join_next().await,
        };

        match joined {
            None => break,
            Some(Ok(Ok(()))) => report.closed += 1,
            Some(Ok(Err(e))) => {
                error!("Failed to close sink: {e}");
                report.failed += 1;
            }
            Some(Err(e)) => {
                error!("Sink close task failed: {e}");
                report.failed += 1;
            }
        }
    }

    debug!(
        "Drain finished: {} closed, {} failed, {} abandoned",
        report.closed, report.failed, report.abandoned
    );
    report
}
