// src/mirror/cursor.rs
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::store::MirrorStore;

/// Where a log's mirroring resumes, and how much is missing below it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    /// One past the highest persisted index, or 0 for an empty log
    pub next_index: u64,
    /// Indices below `next_index` with no persisted entry
    pub gap_count: u64,
}

/// Computes resume points purely from persisted state.
///
/// The cursor follows the highest committed index, not a contiguous low-water
/// mark: windows that were dropped below it are never fetched again.
pub struct CursorTracker<'a> {
    store: &'a dyn MirrorStore,
}

impl<'a> CursorTracker<'a> {
    pub fn new(store: &'a dyn MirrorStore) -> Self {
        Self { store }
    }

    pub async fn resume_index(&self, log_id: i64) -> Result<u64> {
        let max = self
            .store
            .max_entry_index(log_id)
            .await
            .with_context(|| format!("getting max entry for log {}", log_id))?;
        Ok(max.map_or(0, |index| index + 1))
    }

    /// Resume index plus a gap count, logged for the operator
    pub async fn resume_point(&self, log_id: i64, base_url: &str) -> Result<ResumePoint> {
        let next_index = self.resume_index(log_id).await?;
        let stored = self
            .store
            .entry_count(log_id)
            .await
            .with_context(|| format!("counting entries for log {}", log_id))?;
        let gap_count = next_index.saturating_sub(stored);

        info!("next index for log {} ({}) is {}", log_id, base_url, next_index);
        if gap_count > 0 {
            warn!(
                "log {} ({}) has {} missing entries below index {}; they will not be re-fetched",
                log_id, base_url, gap_count, next_index
            );
        }

        Ok(ResumePoint {
            next_index,
            gap_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn store_with_entries(log_id: i64, indices: &[u64]) -> MemoryStore {
        let store = MemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        for index in indices {
            txn.insert_log_entry(log_id, *index, 1).await.unwrap();
        }
        txn.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_empty_log_starts_at_zero() {
        let store = MemoryStore::new();
        let cursor = CursorTracker::new(&store);
        assert_eq!(cursor.resume_index(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resume_after_max_index() {
        let store = store_with_entries(1, &[0, 1, 2]).await;
        let cursor = CursorTracker::new(&store);
        assert_eq!(cursor.resume_index(1).await.unwrap(), 3);
        // Other logs are unaffected
        assert_eq!(cursor.resume_index(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_gap_is_counted_but_skipped() {
        let store = store_with_entries(1, &[5, 6, 9]).await;
        let cursor = CursorTracker::new(&store);

        let point = cursor.resume_point(1, "https://ct.example/log").await.unwrap();
        assert_eq!(point.next_index, 10);
        assert_eq!(point.gap_count, 7);
    }
}
