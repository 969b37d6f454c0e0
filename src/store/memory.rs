// src/store/memory.rs
//! In-memory [`MirrorStore`] with the same uniqueness rules as the
//! PostgreSQL schema. Transactions work on a copy of the tables taken at
//! `begin` and swap it in on commit.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    EntryInsert, MirrorStore, NewCertificate, NewFqdnSet, NewName, Resolved, StoreTxn,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRow {
    pub id: i64,
    pub sha256: [u8; 32],
    pub serial: Vec<u8>,
    pub not_after: DateTime<Utc>,
    pub is_precert: bool,
    pub issuer_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NameRow {
    pub certificate_id: i64,
    pub reversed_name: String,
    pub not_after: DateTime<Utc>,
    pub issuer_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FqdnSetRow {
    pub certificate_id: i64,
    pub sha256: [u8; 32],
    pub not_after: DateTime<Utc>,
    pub issuer_id: i64,
}

/// Full contents of a [`MemoryStore`]
#[derive(Debug, Clone, Default)]
pub struct Tables {
    /// url → id
    pub logs: BTreeMap<String, i64>,
    /// distinguished name → id
    pub issuers: BTreeMap<String, i64>,
    pub certificates: Vec<CertificateRow>,
    /// (log id, index) → certificate id
    pub log_entries: BTreeMap<(i64, u64), i64>,
    pub names: BTreeSet<NameRow>,
    pub fqdn_sets: BTreeSet<FqdnSetRow>,
}

impl Tables {
    fn next_id(len: usize) -> i64 {
        len as i64 + 1
    }

    pub fn issuer_name(&self, id: i64) -> Option<&str> {
        self.issuers
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
    }

    pub fn certificate_by_hash(&self, sha256: &[u8; 32]) -> Option<&CertificateRow> {
        self.certificates.iter().find(|c| &c.sha256 == sha256)
    }

    /// Indices stored for a log, ascending
    pub fn entry_indices(&self, log_id: i64) -> Vec<u64> {
        self.log_entries
            .range((log_id, 0)..=(log_id, u64::MAX))
            .map(|((_, index), _)| *index)
            .collect()
    }

    /// Reversed names stored for a certificate, sorted
    pub fn names_for(&self, certificate_id: i64) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| n.certificate_id == certificate_id)
            .map(|n| n.reversed_name.clone())
            .collect()
    }

    pub fn fqdn_sets_for(&self, certificate_id: i64) -> Vec<[u8; 32]> {
        self.fqdn_sets
            .iter()
            .filter(|s| s.certificate_id == certificate_id)
            .map(|s| s.sha256)
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed tables
    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }
}

#[async_trait]
impl MirrorStore for MemoryStore {
    async fn insert_log(&self, base_url: &str) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if tables.logs.contains_key(base_url) {
            return Ok(false);
        }
        let id = Tables::next_id(tables.logs.len());
        tables.logs.insert(base_url.to_string(), id);
        Ok(true)
    }

    async fn find_log(&self, base_url: &str) -> Result<Option<i64>> {
        Ok(self.tables.lock().await.logs.get(base_url).copied())
    }

    async fn max_entry_index(&self, log_id: i64) -> Result<Option<u64>> {
        let tables = self.tables.lock().await;
        Ok(tables.entry_indices(log_id).last().copied())
    }

    async fn entry_count(&self, log_id: i64) -> Result<u64> {
        let tables = self.tables.lock().await;
        Ok(tables.entry_indices(log_id).len() as u64)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTxn>> {
        let committed = Arc::clone(&self.tables).lock_owned().await;
        let staged = committed.clone();
        Ok(Box::new(MemoryTxn { committed, staged }))
    }
}

struct MemoryTxn {
    committed: OwnedMutexGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl StoreTxn for MemoryTxn {
    async fn issuer_id(&mut self, distinguished_name: &str) -> Result<Resolved> {
        if let Some(id) = self.staged.issuers.get(distinguished_name) {
            return Ok(Resolved { id: *id, created: false });
        }
        let id = Tables::next_id(self.staged.issuers.len());
        self.staged
            .issuers
            .insert(distinguished_name.to_string(), id);
        Ok(Resolved { id, created: true })
    }

    async fn certificate_id(&mut self, cert: &NewCertificate) -> Result<Resolved> {
        if let Some(row) = self.staged.certificate_by_hash(&cert.sha256) {
            return Ok(Resolved {
                id: row.id,
                created: false,
            });
        }
        let id = Tables::next_id(self.staged.certificates.len());
        self.staged.certificates.push(CertificateRow {
            id,
            sha256: cert.sha256,
            serial: cert.serial.clone(),
            not_after: cert.not_after,
            is_precert: cert.is_precert,
            issuer_id: cert.issuer_id,
        });
        Ok(Resolved { id, created: true })
    }

    async fn insert_log_entry(
        &mut self,
        log_id: i64,
        index: u64,
        certificate_id: i64,
    ) -> Result<EntryInsert> {
        match self.staged.log_entries.get(&(log_id, index)) {
            Some(existing) => Ok(EntryInsert::Existing(*existing)),
            None => {
                self.staged
                    .log_entries
                    .insert((log_id, index), certificate_id);
                Ok(EntryInsert::Inserted)
            }
        }
    }

    async fn insert_name(&mut self, name: &NewName) -> Result<bool> {
        let duplicate = self.staged.names.iter().any(|n| {
            n.certificate_id == name.certificate_id && n.reversed_name == name.reversed_name
        });
        if duplicate {
            return Ok(false);
        }
        Ok(self.staged.names.insert(NameRow {
            certificate_id: name.certificate_id,
            reversed_name: name.reversed_name.clone(),
            not_after: name.not_after,
            issuer_id: name.issuer_id,
        }))
    }

    async fn insert_fqdn_set(&mut self, set: &NewFqdnSet) -> Result<bool> {
        let duplicate = self
            .staged
            .fqdn_sets
            .iter()
            .any(|s| s.certificate_id == set.certificate_id && s.sha256 == set.sha256);
        if duplicate {
            return Ok(false);
        }
        Ok(self.staged.fqdn_sets.insert(FqdnSetRow {
            certificate_id: set.certificate_id,
            sha256: set.sha256,
            not_after: set.not_after,
            issuer_id: set.issuer_id,
        }))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTxn {
            mut committed,
            staged,
        } = *self;
        *committed = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
