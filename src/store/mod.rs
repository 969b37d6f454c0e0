// src/store/mod.rs
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Certificate attributes stored on first sight only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCertificate {
    pub sha256: [u8; 32],
    pub serial: Vec<u8>,
    pub not_after: DateTime<Utc>,
    pub is_precert: bool,
    pub issuer_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewName {
    pub reversed_name: String,
    pub not_after: DateTime<Utc>,
    pub issuer_id: i64,
    pub certificate_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFqdnSet {
    pub sha256: [u8; 32],
    pub not_after: DateTime<Utc>,
    pub issuer_id: i64,
    pub certificate_id: i64,
}

/// Result of a get-or-create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub id: i64,
    pub created: bool,
}

/// Result of inserting a (log, index) → certificate row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryInsert {
    Inserted,
    /// A row already exists; carries its certificate id
    Existing(i64),
}

/// Rows inserted, per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub logs: u64,
    pub issuers: u64,
    pub certificates: u64,
    pub log_entries: u64,
    pub names: u64,
    pub fqdn_sets: u64,
}

impl RowCounts {
    pub fn by_table(&self) -> [(&'static str, u64); 6] {
        [
            ("logs", self.logs),
            ("issuers", self.issuers),
            ("certificates", self.certificates),
            ("log_entries", self.log_entries),
            ("names", self.names),
            ("fqdn_sets", self.fqdn_sets),
        ]
    }

    pub fn total(&self) -> u64 {
        self.by_table().iter().map(|(_, n)| n).sum()
    }

    pub fn add(&mut self, other: &RowCounts) {
        self.logs += other.logs;
        self.issuers += other.issuers;
        self.certificates += other.certificates;
        self.log_entries += other.log_entries;
        self.names += other.names;
        self.fqdn_sets += other.fqdn_sets;
    }
}

/// Persistent store for mirrored log data
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Insert a log row if none exists for `base_url`; true if inserted
    async fn insert_log(&self, base_url: &str) -> Result<bool>;

    /// Look up the id of the log row for `base_url`
    async fn find_log(&self, base_url: &str) -> Result<Option<i64>>;

    /// Highest persisted entry index for a log
    async fn max_entry_index(&self, log_id: i64) -> Result<Option<u64>>;

    /// Number of persisted entries for a log
    async fn entry_count(&self, log_id: i64) -> Result<u64>;

    /// Open a write transaction. Callers go through [`StoreHandle::begin_write`].
    async fn begin(&self) -> Result<Box<dyn StoreTxn>>;
}

/// One open write transaction. Dropping it without commit rolls back.
#[async_trait]
pub trait StoreTxn: Send {
    /// Get-or-create an issuer by distinguished name
    async fn issuer_id(&mut self, distinguished_name: &str) -> Result<Resolved>;

    /// Get-or-create a certificate keyed by its sha256
    async fn certificate_id(&mut self, cert: &NewCertificate) -> Result<Resolved>;

    async fn insert_log_entry(
        &mut self,
        log_id: i64,
        index: u64,
        certificate_id: i64,
    ) -> Result<EntryInsert>;

    /// Insert a name row; false if it was already present
    async fn insert_name(&mut self, name: &NewName) -> Result<bool>;

    /// Insert an fqdn set row; false if it was already present
    async fn insert_fqdn_set(&mut self, set: &NewFqdnSet) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Shared access to the store with a process-wide write gate.
///
/// At most one write transaction (or log get-or-create) is open at a time,
/// whatever the backend's pool size.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn MirrorStore>,
    write_gate: Arc<Mutex<()>>,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn MirrorStore>) -> Self {
        Self {
            store,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Read-only access
    pub fn store(&self) -> &dyn MirrorStore {
        self.store.as_ref()
    }

    /// Hold the write gate without opening a transaction
    pub async fn exclusive(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.write_gate).lock_owned().await
    }

    /// Acquire the write gate, then open a transaction
    pub async fn begin_write(&self) -> Result<WriteTxn> {
        let gate = self.exclusive().await;
        let txn = self.store.begin().await?;
        Ok(WriteTxn { txn, _gate: gate })
    }
}

/// A transaction holding the write gate until it is finished.
pub struct WriteTxn {
    // Declared first so an abandoned transaction rolls back before the gate opens
    txn: Box<dyn StoreTxn>,
    _gate: OwnedMutexGuard<()>,
}

impl WriteTxn {
    pub fn txn(&mut self) -> &mut dyn StoreTxn {
        self.txn.as_mut()
    }

    pub async fn commit(self) -> Result<()> {
        self.txn.commit().await
    }

    pub async fn rollback(self) -> Result<()> {
        self.txn.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_write_gate_serializes_transactions() {
        let handle = StoreHandle::new(Arc::new(MemoryStore::new()));

        let first = handle.begin_write().await.unwrap();

        let second_handle = handle.clone();
        let second = tokio::spawn(async move { second_handle.begin_write().await.map(|_| ()) });

        // The second writer cannot get in while the first is open
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        first.commit().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .expect("second writer should proceed after commit")
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_row_counts_total_and_add() {
        let mut a = RowCounts {
            names: 2,
            fqdn_sets: 1,
            ..Default::default()
        };
        let b = RowCounts {
            certificates: 1,
            names: 1,
            ..Default::default()
        };
        a.add(&b);
        assert_eq!(a.names, 3);
        assert_eq!(a.certificates, 1);
        assert_eq!(a.total(), 5);
    }
}
