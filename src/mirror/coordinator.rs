// src/mirror/coordinator.rs
use anyhow::Result;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::cursor::{CursorTracker, ResumePoint};
use super::fetcher::{ChunkFetcher, FetcherConfig};
use super::processor::ChunkProcessor;
use super::queue::{chunk_queue, ChunkSender};
use super::registry::LogRegistry;
use crate::ct_log::EntrySource;
use crate::metrics::MirrorMetrics;
use crate::store::StoreHandle;

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Capacity of the chunk queue shared by all logs
    pub queue_capacity: usize,
    pub fetcher: FetcherConfig,
}

/// A log that has been registered and started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedLog {
    pub log_id: i64,
    pub resume: ResumePoint,
}

/// Stops every fetch worker; the writer finishes the queued chunks and exits
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        info!("Shutdown requested, stopping fetch workers");
        self.0.send_replace(true);
    }
}

/// Mirror Coordinator - runs one fetch pool per log feeding a single writer
pub struct MirrorCoordinator {
    store: StoreHandle,
    registry: LogRegistry,
    metrics: MirrorMetrics,
    config: CoordinatorConfig,
    sender: ChunkSender,
    processor: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl MirrorCoordinator {
    /// Create the chunk queue and start the writer. Must be called inside a runtime.
    pub fn new(store: StoreHandle, metrics: MirrorMetrics, config: CoordinatorConfig) -> Self {
        let (sender, receiver) = chunk_queue(config.queue_capacity.max(1), metrics.clone());
        let (shutdown_tx, _) = watch::channel(false);

        let processor = ChunkProcessor::new(store.clone(), receiver, metrics.clone());
        let processor = tokio::spawn(processor.run());

        Self {
            registry: LogRegistry::new(store.clone(), metrics.clone()),
            store,
            metrics,
            config,
            sender,
            processor,
            workers: Vec::new(),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Register a log, work out where it resumes, and start its fetch workers
    pub async fn add_log(&mut self, source: Arc<dyn EntrySource>) -> Result<StartedLog> {
        let base_url = source.base_url().to_string();
        let log_id = self.registry.get_or_create_log_id(&base_url).await?;
        let resume = CursorTracker::new(self.store.store())
            .resume_point(log_id, &base_url)
            .await?;

        let fetcher = ChunkFetcher::new(
            log_id,
            resume.next_index,
            source,
            &self.config.fetcher,
            self.sender.clone(),
            self.metrics.clone(),
        );
        let handles = fetcher.spawn(self.config.fetcher.workers, self.shutdown_tx.subscribe());
        self.workers.extend(handles);

        Ok(StartedLog { log_id, resume })
    }

    /// Run until shutdown is triggered and the queue has drained
    pub async fn run(self) {
        info!(
            "Mirror coordinator running with {} fetch workers",
            self.workers.len()
        );

        // Only the workers hold senders now, so the queue closes when they stop
        drop(self.sender);

        for result in join_all(self.workers).await {
            if let Err(e) = result {
                error!("Fetch worker failed: {}", e);
            }
        }
        info!("All fetch workers stopped, draining chunk queue");

        if let Err(e) = self.processor.await {
            error!("Chunk writer failed: {}", e);
        }
        info!("Mirror coordinator stopped");
    }
}
