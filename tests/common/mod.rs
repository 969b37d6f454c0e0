// Shared helpers for integration tests
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use ct_mirror::ct_log::{EntrySource, EntryType, FetchedEntry};
use ct_mirror::mirror::{CoordinatorConfig, FetcherConfig, PlannerConfig};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

pub const LEAF_A1: &[u8] = include_bytes!("../fixtures/leaf_a1.der");
pub const LEAF_A2: &[u8] = include_bytes!("../fixtures/leaf_a2.der");
pub const PRECERT_B1: &[u8] = include_bytes!("../fixtures/precert_b1.tbs");

/// Scripted in-memory CT log
pub struct FakeLog {
    url: String,
    entries: Mutex<Vec<(EntryType, Vec<u8>)>>,
    failing_starts: Mutex<HashSet<u64>>,
    calls: Mutex<Vec<(u64, u64)>>,
}

impl FakeLog {
    pub fn new(url: &str, entries: Vec<(EntryType, &[u8])>) -> Self {
        Self {
            url: url.to_string(),
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(entry_type, der)| (entry_type, der.to_vec()))
                    .collect(),
            ),
            failing_starts: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `count` copies of the same certificate
    pub fn repeated(url: &str, der: &[u8], count: usize) -> Self {
        Self::new(url, vec![(EntryType::X509, der); count])
    }

    /// Every get-entries request starting at `start` fails
    pub fn fail_window_at(&self, start: u64) {
        self.failing_starts.lock().unwrap().insert(start);
    }

    pub fn append(&self, entry_type: EntryType, der: &[u8]) {
        self.entries.lock().unwrap().push((entry_type, der.to_vec()));
    }

    /// get-entries ranges requested so far
    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntrySource for FakeLog {
    fn base_url(&self) -> &str {
        &self.url
    }

    async fn tree_size(&self) -> Result<u64> {
        Ok(self.entries.lock().unwrap().len() as u64)
    }

    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<FetchedEntry>> {
        self.calls.lock().unwrap().push((start, end));

        if self.failing_starts.lock().unwrap().contains(&start) {
            anyhow::bail!("scripted failure for {}-{}", start, end);
        }

        let entries = self.entries.lock().unwrap();
        if end as usize >= entries.len() {
            anyhow::bail!("range {}-{} past tree size {}", start, end, entries.len());
        }

        Ok((start..=end)
            .map(|index| {
                let (entry_type, der) = &entries[index as usize];
                FetchedEntry {
                    index,
                    entry_type: *entry_type,
                    der: der.clone(),
                }
            })
            .collect())
    }
}

pub fn test_config(window_size: u64, workers: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        queue_capacity: 4,
        fetcher: FetcherConfig {
            planner: PlannerConfig {
                window_size,
                poll_interval: Duration::from_millis(10),
                max_poll_interval: Duration::from_millis(40),
            },
            workers,
            failure_threshold: 3,
            failure_backoff: Duration::from_millis(10),
        },
    }
}

/// Poll `check` until it returns true, panicking after ten seconds
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
