// src/mirror/fetcher.rs
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::{Chunk, ChunkSender};
use super::window::{PlannerConfig, Window, WindowPlanner};
use crate::ct_log::{EntrySource, FetchHealth, LogHealth};
use crate::error::MirrorError;
use crate::metrics::MirrorMetrics;

/// Fetches windows of one log with a fixed pool of workers and hands the
/// completed chunks to the writer.
///
/// Workers pull window descriptors from a shared [`WindowPlanner`], so the
/// number of in-flight requests per log never exceeds the pool size. A
/// window that fails is logged and dropped; it is not handed out again.
pub struct ChunkFetcher {
    log_id: i64,
    source: Arc<dyn EntrySource>,
    planner: Mutex<WindowPlanner>,
    health: FetchHealth,
    sender: ChunkSender,
    metrics: MirrorMetrics,
}

/// Settings for one log's fetch pool
#[derive(Debug, Clone, Copy)]
pub struct FetcherConfig {
    pub planner: PlannerConfig,
    pub workers: usize,
    pub failure_threshold: u32,
    pub failure_backoff: std::time::Duration,
}

impl ChunkFetcher {
    pub fn new(
        log_id: i64,
        start_index: u64,
        source: Arc<dyn EntrySource>,
        config: &FetcherConfig,
        sender: ChunkSender,
        metrics: MirrorMetrics,
    ) -> Self {
        let health = FetchHealth::new(
            source.base_url().to_string(),
            config.failure_threshold,
            config.failure_backoff,
        );
        metrics.set_next_index(source.base_url(), start_index);
        metrics.set_log_health(source.base_url(), LogHealth::Healthy);

        Self {
            log_id,
            planner: Mutex::new(WindowPlanner::new(start_index, config.planner)),
            source,
            health,
            sender,
            metrics,
        }
    }

    /// Start `workers` fetch tasks that run until `shutdown` flips to true
    pub fn spawn(self, workers: usize, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let fetcher = Arc::new(self);
        info!(
            "Starting {} fetch workers for log {} ({})",
            workers,
            fetcher.log_id,
            fetcher.source.base_url()
        );

        (0..workers.max(1))
            .map(|worker| {
                let fetcher = Arc::clone(&fetcher);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { fetcher.run_worker(worker, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let cooldown = self.health.cooldown();
            if !cooldown.is_zero() {
                debug!(
                    "{}: worker {} cooling down for {:?} after {} consecutive failures (last: {})",
                    self.source.base_url(),
                    worker,
                    cooldown,
                    self.health.failure_count(),
                    self.health.last_error().unwrap_or_default()
                );
                tokio::select! {
                    _ = tokio::time::sleep(cooldown) => {},
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            let window = tokio::select! {
                window = self.claim_window() => window,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let fetched = tokio::select! {
                fetched = self.fetch_window(window) => fetched,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match fetched {
                Ok(chunk) => {
                    if self.sender.push(chunk).await.is_err() {
                        warn!(
                            "{}: writer is gone, stopping worker {}",
                            self.source.base_url(),
                            worker
                        );
                        break;
                    }
                }
                Err(e) => {
                    self.metrics.fetch_failed();
                    warn!(
                        "error getting entries {} to {} from log {} ({}): {}",
                        window.start,
                        window.end,
                        self.log_id,
                        self.source.base_url(),
                        e
                    );
                }
            }
        }

        debug!("{}: worker {} stopped", self.source.base_url(), worker);
    }

    /// Take the next window from the shared planner, waiting while caught up
    pub async fn claim_window(&self) -> Window {
        let mut planner = self.planner.lock().await;
        let window = planner.next_window(self.source.as_ref()).await;
        self.metrics
            .set_next_index(self.source.base_url(), planner.next_start());
        window
    }

    /// Fetch one window into a chunk. A response that does not cover the
    /// whole window counts as a failed fetch.
    pub async fn fetch_window(&self, window: Window) -> Result<Chunk, MirrorError> {
        let begin = Instant::now();

        let entries = match self.source.get_entries(window.start, window.end).await {
            Ok(entries) if entries.len() as u64 == window.len() => entries,
            Ok(entries) => {
                return Err(self.fetch_failed(
                    window,
                    anyhow::anyhow!(
                        "got {} entries for a window of {}",
                        entries.len(),
                        window.len()
                    ),
                ));
            }
            Err(source) => return Err(self.fetch_failed(window, source)),
        };

        self.health.record_success();
        self.metrics
            .set_log_health(self.source.base_url(), self.health.status());
        debug!(
            "fetched {} entries {} to {} for log {} ({}) in {:?}",
            window.len(),
            window.start,
            window.end,
            self.log_id,
            self.source.base_url(),
            begin.elapsed()
        );

        Ok(Chunk {
            log_id: self.log_id,
            start_index: window.start,
            end_index: window.end,
            entries,
        })
    }

    fn fetch_failed(&self, window: Window, source: anyhow::Error) -> MirrorError {
        self.health.record_failure(&format!("{:#}", source));
        self.metrics
            .set_log_health(self.source.base_url(), self.health.status());
        MirrorError::Fetch {
            start: window.start,
            end: window.end,
            source,
        }
    }
}
