// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::entry::LogEntry;
use crate::error::SinkError;
use crate::sink::{Sink, SinkFactory};

/// Sink keeping every appended entry in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    name: String,
    entries: Mutex<Vec<LogEntry>>,
    closed: AtomicBool,
    close_count: AtomicUsize,
    close_delay: Option<Duration>,
    fail_close: bool,
}

impl MemorySink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.message).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of times `close` ran to completion.
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn append(&self, entry: LogEntry) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed(self.name.clone()));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SinkError::Closed(self.name.clone()))?;
        entries.push(entry);
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_close {
            return Err(SinkError::Closed(self.name.clone()));
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Factory handing out [`MemorySink`]s and recording every creation attempt.
#[derive(Debug, Default)]
pub struct MemorySinkFactory {
    sinks: Mutex<HashMap<String, Arc<MemorySink>>>,
    attempts: Mutex<Vec<String>>,
    failing: Mutex<HashMap<String, String>>,
    create_delay: Option<Duration>,
    close_delay: Option<Duration>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps inside every `create`, widening the window for concurrent first requests.
    #[must_use]
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = Some(delay);
        self
    }

    /// Makes creation of `name` fail with `reason` until [`Self::recover`] is called.
    pub fn fail_creation_of(&self, name: &str, reason: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(name.to_string(), reason.to_string());
        }
    }

    pub fn recover(&self, name: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(name);
        }
    }

    /// Every name `create` was called with, in call order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .map(|attempts| attempts.clone())
            .unwrap_or_default()
    }

    pub fn created(&self) -> usize {
        self.sinks.lock().map(|sinks| sinks.len()).unwrap_or(0)
    }

    pub fn sink(&self, name: &str) -> Option<Arc<MemorySink>> {
        self.sinks
            .lock()
            .ok()
            .and_then(|sinks| sinks.get(name).cloned())
    }
}

#[async_trait]
impl SinkFactory for MemorySinkFactory {
    async fn create(&self, name: &str) -> Result<Arc<dyn Sink>, SinkError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(name.to_string());
        }
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failing
            .lock()
            .ok()
            .and_then(|failing| failing.get(name).cloned());
        if let Some(reason) = failure {
            return Err(SinkError::Creation {
                name: name.to_string(),
                reason,
            });
        }

        let mut sink = MemorySink::new(name);
        if let Some(delay) = self.close_delay {
            sink = sink.with_close_delay(delay);
        }
        let sink = Arc::new(sink);
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.insert(name.to_string(), Arc::clone(&sink));
        }
        Ok(sink)
    }
}
