// src/mirror/processor.rs
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::normalizer::Normalizer;
use super::queue::{Chunk, ChunkReceiver};
use crate::error::MirrorError;
use crate::metrics::MirrorMetrics;
use crate::store::{RowCounts, StoreHandle};

/// The single consumer of the chunk queue.
///
/// Each chunk is written in one transaction: every entry lands or none
/// does. A chunk that fails is rolled back and dropped.
pub struct ChunkProcessor {
    store: StoreHandle,
    receiver: ChunkReceiver,
    normalizer: Normalizer,
    metrics: MirrorMetrics,
}

impl ChunkProcessor {
    pub fn new(store: StoreHandle, receiver: ChunkReceiver, metrics: MirrorMetrics) -> Self {
        Self {
            store,
            receiver,
            normalizer: Normalizer::new(),
            metrics,
        }
    }

    /// Consume chunks until every sender is gone and the queue is empty
    pub async fn run(mut self) {
        let mut committed = 0u64;
        let mut dropped = 0u64;

        while let Some(chunk) = self.receiver.pop().await {
            let begin = Instant::now();
            let count = chunk.entries.len();

            match process_chunk(&self.store, &self.normalizer, &chunk).await {
                Ok(rows) => {
                    committed += 1;
                    self.metrics.chunk_committed();
                    self.metrics.record_rows(&rows);
                    info!(
                        "log {}: inserted {} entries from {}: {} issuers, {} certificates, {} log entries, {} names, {} fqdn sets in {:?}",
                        chunk.log_id,
                        count,
                        chunk.start_index,
                        rows.issuers,
                        rows.certificates,
                        rows.log_entries,
                        rows.names,
                        rows.fqdn_sets,
                        begin.elapsed()
                    );
                }
                Err(e) => {
                    dropped += 1;
                    self.metrics.chunk_dropped(e.kind());
                    error!(
                        "log {}: dropping chunk of {} entries from {} ({}): {}",
                        chunk.log_id,
                        count,
                        chunk.start_index,
                        e.kind(),
                        e
                    );
                }
            }
        }

        info!(
            "Chunk queue drained: {} chunks committed, {} dropped",
            committed, dropped
        );
    }
}

/// Write one chunk atomically and return the rows it inserted
pub async fn process_chunk(
    store: &StoreHandle,
    normalizer: &Normalizer,
    chunk: &Chunk,
) -> Result<RowCounts, MirrorError> {
    if !chunk.covers_window() {
        return Err(MirrorError::Fetch {
            start: chunk.start_index,
            end: chunk.end_index,
            source: anyhow::anyhow!(
                "got {} entries for a window of {}",
                chunk.entries.len(),
                chunk.end_index.saturating_sub(chunk.start_index).saturating_add(1)
            ),
        });
    }

    let mut write = store.begin_write().await?;
    let mut rows = RowCounts::default();

    let mut result = Ok(());
    for (offset, entry) in chunk.entries.iter().enumerate() {
        let expected = chunk.start_index + offset as u64;
        if entry.index != expected {
            result = Err(MirrorError::IndexMismatch {
                expected,
                reported: entry.index,
            });
            break;
        }

        match normalizer
            .apply(write.txn(), chunk.log_id, expected, entry)
            .await
        {
            Ok(entry_rows) => rows.add(&entry_rows),
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    if let Err(e) = result {
        if let Err(rollback) = write.rollback().await {
            warn!(
                "log {}: rollback of chunk at {} failed: {:#}",
                chunk.log_id, chunk.start_index, rollback
            );
        }
        return Err(e);
    }

    write.commit().await?;
    debug!(
        "log {}: committed chunk at {} ({} rows)",
        chunk.log_id,
        chunk.start_index,
        rows.total()
    );
    Ok(rows)
}
