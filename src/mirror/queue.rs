// src/mirror/queue.rs
use tokio::sync::mpsc;

use crate::ct_log::FetchedEntry;
use crate::metrics::MirrorMetrics;

/// A fetched window on its way to the writer
#[derive(Debug, Clone)]
pub struct Chunk {
    pub log_id: i64,
    pub start_index: u64,
    /// Last index of the window, inclusive
    pub end_index: u64,
    pub entries: Vec<FetchedEntry>,
}

impl Chunk {
    /// True when there is exactly one entry per index of the window
    pub fn covers_window(&self) -> bool {
        self.end_index >= self.start_index
            && self.entries.len() as u64 == self.end_index - self.start_index + 1
    }
}

/// Create the bounded FIFO between fetch workers and the writer
pub fn chunk_queue(capacity: usize, metrics: MirrorMetrics) -> (ChunkSender, ChunkReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        ChunkSender {
            tx,
            metrics: metrics.clone(),
        },
        ChunkReceiver { rx, metrics },
    )
}

#[derive(Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<Chunk>,
    metrics: MirrorMetrics,
}

impl ChunkSender {
    /// Blocks while the queue is full. Returns the chunk back if the writer is gone.
    pub async fn push(&self, chunk: Chunk) -> Result<(), Chunk> {
        self.tx.send(chunk).await.map_err(|e| e.0)?;
        self.metrics
            .set_queue_depth(self.tx.max_capacity() - self.tx.capacity());
        Ok(())
    }
}

pub struct ChunkReceiver {
    rx: mpsc::Receiver<Chunk>,
    metrics: MirrorMetrics,
}

impl ChunkReceiver {
    /// Next chunk in arrival order; None once every sender is gone and the queue is drained
    pub async fn pop(&mut self) -> Option<Chunk> {
        let chunk = self.rx.recv().await;
        self.metrics.set_queue_depth(self.rx.len());
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;
    use std::time::Duration;

    fn chunk(start_index: u64) -> Chunk {
        Chunk {
            log_id: 1,
            start_index,
            end_index: start_index,
            entries: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let metrics = MirrorMetrics::new(&Registry::new()).unwrap();
        let (tx, mut rx) = chunk_queue(4, metrics);

        tx.push(chunk(0)).await.unwrap();
        tx.push(chunk(1000)).await.unwrap();
        drop(tx);

        assert_eq!(rx.pop().await.unwrap().start_index, 0);
        assert_eq!(rx.pop().await.unwrap().start_index, 1000);
        assert!(rx.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_push_blocks_when_full() {
        let metrics = MirrorMetrics::new(&Registry::new()).unwrap();
        let (tx, mut rx) = chunk_queue(1, metrics);

        tx.push(chunk(0)).await.unwrap();

        let blocked = tokio::spawn({
            let tx = tx.clone();
            async move { tx.push(chunk(1)).await.is_ok() }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.pop().await.unwrap().start_index, 0);
        assert!(blocked.await.unwrap());
        assert_eq!(rx.pop().await.unwrap().start_index, 1);
    }

    #[tokio::test]
    async fn test_push_fails_once_writer_is_gone() {
        let metrics = MirrorMetrics::new(&Registry::new()).unwrap();
        let (tx, rx) = chunk_queue(1, metrics);
        drop(rx);

        let returned = tx.push(chunk(5)).await.unwrap_err();
        assert_eq!(returned.start_index, 5);
    }

    #[test]
    fn test_covers_window() {
        let entry = |index| FetchedEntry {
            index,
            entry_type: crate::ct_log::EntryType::X509,
            der: Vec::new(),
        };
        let mut chunk = Chunk {
            log_id: 1,
            start_index: 10,
            end_index: 12,
            entries: vec![entry(10), entry(11), entry(12)],
        };
        assert!(chunk.covers_window());

        chunk.entries.pop();
        assert!(!chunk.covers_window());

        // No entries for a one-entry window
        assert!(!self::chunk(3).covers_window());
    }
}
