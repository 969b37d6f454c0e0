// src/mirror/registry.rs
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::metrics::MirrorMetrics;
use crate::store::{RowCounts, StoreHandle};

/// Maps a log's base URL to its stable id
#[derive(Clone)]
pub struct LogRegistry {
    store: StoreHandle,
    metrics: MirrorMetrics,
}

impl LogRegistry {
    pub fn new(store: StoreHandle, metrics: MirrorMetrics) -> Self {
        Self { store, metrics }
    }

    /// Insert-if-absent, then look up by URL. A failed insert is tolerated
    /// as long as the lookup finds the row.
    pub async fn get_or_create_log_id(&self, base_url: &str) -> Result<i64> {
        let _gate = self.store.exclusive().await;

        match self.store.store().insert_log(base_url).await {
            Ok(true) => {
                self.metrics.record_rows(&RowCounts {
                    logs: 1,
                    ..Default::default()
                });
                info!("Registered new log {}", base_url);
            }
            Ok(false) => {}
            Err(e) => warn!("Inserting log {} failed, trying lookup: {:#}", base_url, e),
        }

        self.store
            .store()
            .find_log(base_url)
            .await
            .with_context(|| format!("getting log ID for {}", base_url))?
            .with_context(|| format!("no log row for {}", base_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use prometheus::Registry;
    use std::sync::Arc;

    fn registry() -> (LogRegistry, MirrorMetrics) {
        let metrics = MirrorMetrics::new(&Registry::new()).unwrap();
        let registry = LogRegistry::new(
            StoreHandle::new(Arc::new(MemoryStore::new())),
            metrics.clone(),
        );
        (registry, metrics)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (registry, _) = registry();

        let a = registry.get_or_create_log_id("https://ct.example/a").await.unwrap();
        let b = registry.get_or_create_log_id("https://ct.example/b").await.unwrap();
        let a_again = registry.get_or_create_log_id("https://ct.example/a").await.unwrap();

        assert_eq!(a, a_again);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_concurrent_registration_yields_one_id() {
        let (registry, metrics) = registry();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_create_log_id("https://ct.example/a").await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(metrics.inserted("logs"), 1);
    }

    #[tokio::test]
    async fn test_only_new_log_rows_are_counted() {
        let (registry, metrics) = registry();

        registry.get_or_create_log_id("https://ct.example/a").await.unwrap();
        assert_eq!(metrics.inserted("logs"), 1);

        registry.get_or_create_log_id("https://ct.example/a").await.unwrap();
        assert_eq!(metrics.inserted("logs"), 1);

        registry.get_or_create_log_id("https://ct.example/b").await.unwrap();
        assert_eq!(metrics.inserted("logs"), 2);
    }
}
