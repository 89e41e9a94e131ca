// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-destination sink registry.
//!
//! Sinks are created lazily, on the first request naming a destination, and live until
//! shutdown. Creation happens while the registry lock is held, so concurrent first requests for
//! one destination wait for each other and exactly one sink is ever built for it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{RegistryError, SinkError};
use crate::sink::{Sink, SinkFactory};

/// What happens to a destination whose sink could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreationFailurePolicy {
    /// Remember the failure: later requests for the destination fail fast without calling the
    /// factory again, until the process restarts.
    #[default]
    CacheFailure,
    /// Forget the failure: the next request retries creation.
    RetryNextRequest,
}

enum Slot {
    Ready(Arc<dyn Sink>),
    Failed(Arc<SinkError>),
}

pub struct SinkRegistry {
    factory: Arc<dyn SinkFactory>,
    policy: CreationFailurePolicy,
    sinks: Mutex<HashMap<String, Slot>>,
}

impl SinkRegistry {
    pub fn new(factory: Arc<dyn SinkFactory>, policy: CreationFailurePolicy) -> Self {
        Self {
            factory,
            policy,
            sinks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the sink for `name`, creating it on first use.
    pub async fn get_or_create(&self, name: &str) -> Result<Arc<dyn Sink>, RegistryError> {
        let mut sinks = self.sinks.lock().await;
        match sinks.get(name) {
            Some(Slot::Ready(sink)) => return Ok(Arc::clone(sink)),
            Some(Slot::Failed(cause)) => return Err(RegistryError::CachedFailure(Arc::clone(cause))),
            None => {}
        }

        debug!("Creating sink for {name}");
        match self.factory.create(name).await {
            Ok(sink) => {
                sinks.insert(name.to_string(), Slot::Ready(Arc::clone(&sink)));
                Ok(sink)
            }
            Err(e) => {
                let cause = Arc::new(e);
                match self.policy {
                    CreationFailurePolicy::CacheFailure => {
                        warn!("Caching failed sink creation for {name}: {cause}");
                        sinks.insert(name.to_string(), Slot::Failed(Arc::clone(&cause)));
                    }
                    CreationFailurePolicy::RetryNextRequest => {}
                }
                Err(RegistryError::Creation(cause))
            }
        }
    }

    /// Snapshot of every live sink. Cached failures are not included.
    pub async fn all(&self) -> Vec<Arc<dyn Sink>> {
        let sinks = self.sinks.lock().await;
        sinks
            .values()
            .filter_map(|slot| match slot {
                Slot::Ready(sink) => Some(Arc::clone(sink)),
                Slot::Failed(_) => None,
            })
            .collect()
    }

    /// Number of registered destinations, cached failures included.
    pub async fn len(&self) -> usize {
        self.sinks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::memory::MemorySinkFactory;
    use std::time::Duration;

    fn registry(
        factory: &Arc<MemorySinkFactory>,
        policy: CreationFailurePolicy,
    ) -> Arc<SinkRegistry> {
        Arc::new(SinkRegistry::new(
            Arc::clone(factory) as Arc<dyn SinkFactory>,
            policy,
        ))
    }

    #[tokio::test]
    async fn test_sink_is_created_once_and_reused() {
        let factory = Arc::new(MemorySinkFactory::new());
        let registry = registry(&factory, CreationFailurePolicy::default());

        let first = registry.get_or_create("myapp").await.unwrap();
        let second = registry.get_or_create("myapp").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.attempts(), vec!["myapp".to_string()]);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_create_one_sink() {
        let factory = Arc::new(MemorySinkFactory::new().with_create_delay(Duration::from_millis(20)));
        let registry = registry(&factory, CreationFailurePolicy::default());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get_or_create("racy").await })
            })
            .collect();

        let mut sinks = Vec::new();
        for handle in handles {
            sinks.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(factory.attempts().len(), 1);
        assert!(sinks.iter().all(|s| Arc::ptr_eq(s, &sinks[0])));
    }

    #[tokio::test]
    async fn test_cached_failure_is_not_retried() {
        let factory = Arc::new(MemorySinkFactory::new());
        factory.fail_creation_of("broken", "intake unavailable");
        let registry = registry(&factory, CreationFailurePolicy::CacheFailure);

        assert!(matches!(
            registry.get_or_create("broken").await,
            Err(RegistryError::Creation(_))
        ));
        factory.recover("broken");
        assert!(matches!(
            registry.get_or_create("broken").await,
            Err(RegistryError::CachedFailure(_))
        ));

        assert_eq!(factory.attempts().len(), 1);
        assert!(registry.all().await.is_empty());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_retry_policy_recreates_after_failure() {
        let factory = Arc::new(MemorySinkFactory::new());
        factory.fail_creation_of("flaky", "intake unavailable");
        let registry = registry(&factory, CreationFailurePolicy::RetryNextRequest);

        assert!(registry.get_or_create("flaky").await.is_err());
        assert!(registry.is_empty().await);

        factory.recover("flaky");
        assert!(registry.get_or_create("flaky").await.is_ok());
        assert_eq!(factory.attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_all_snapshots_every_live_sink() {
        let factory = Arc::new(MemorySinkFactory::new());
        let registry = registry(&factory, CreationFailurePolicy::default());

        for name in ["a", "b", "c"] {
            registry.get_or_create(name).await.unwrap();
        }
        assert_eq!(registry.all().await.len(), 3);
    }

    #[tokio::test]
    async fn test_destination_names_are_used_verbatim() {
        let factory = Arc::new(MemorySinkFactory::new());
        let registry = registry(&factory, CreationFailurePolicy::default());

        registry.get_or_create("MyApp").await.unwrap();
        registry.get_or_create("myapp").await.unwrap();
        registry.get_or_create("my/app").await.unwrap();
        assert_eq!(factory.created(), 3);
    }
}
