// src/mirror/normalizer.rs
//! Turns one log entry into issuer, certificate, log entry, name and fqdn
//! set rows inside the caller's transaction.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::debug;

use crate::cert_parser::CertificateParser;
use crate::ct_log::FetchedEntry;
use crate::error::MirrorError;
use crate::store::{EntryInsert, NewCertificate, NewFqdnSet, NewName, RowCounts, StoreTxn};

/// Reorder a DNS name's labels root-first: "www.example.com" → "com.example.www"
pub fn reverse_name(domain: &str) -> String {
    domain.split('.').rev().collect::<Vec<_>>().join(".")
}

/// Identity of a certificate's name set: sha256 over the lowercased,
/// deduplicated, sorted names joined by commas
pub fn fqdn_set_hash<S: AsRef<str>>(names: &[S]) -> [u8; 32] {
    let unique: BTreeSet<String> = names
        .iter()
        .map(|name| name.as_ref().to_lowercase())
        .collect();
    let joined = unique.into_iter().collect::<Vec<_>>().join(",");
    Sha256::digest(joined.as_bytes()).into()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Write all rows for the entry at `index` of log `log_id`
    pub async fn apply(
        &self,
        txn: &mut dyn StoreTxn,
        log_id: i64,
        index: u64,
        entry: &FetchedEntry,
    ) -> Result<RowCounts, MirrorError> {
        let cert = CertificateParser::parse_entry(entry.entry_type, &entry.der).map_err(|e| {
            MirrorError::Parse {
                index,
                reason: format!("{:#}", e),
            }
        })?;

        let mut rows = RowCounts::default();

        let issuer = txn.issuer_id(&cert.issuer).await?;
        if issuer.created {
            rows.issuers += 1;
        }

        let certificate = txn
            .certificate_id(&NewCertificate {
                sha256: cert.sha256,
                serial: cert.serial.clone(),
                not_after: cert.not_after,
                is_precert: cert.is_precert,
                issuer_id: issuer.id,
            })
            .await?;
        if certificate.created {
            rows.certificates += 1;
            debug!(
                "new certificate {} (id {}) from log {} index {}",
                cert.fingerprint(),
                certificate.id,
                log_id,
                index
            );
        }

        match txn.insert_log_entry(log_id, index, certificate.id).await? {
            EntryInsert::Inserted => rows.log_entries += 1,
            EntryInsert::Existing(existing) if existing == certificate.id => {
                debug!("log {} index {} already mirrored", log_id, index);
            }
            EntryInsert::Existing(existing) => {
                return Err(MirrorError::Conflict {
                    log_id,
                    index,
                    existing,
                    incoming: certificate.id,
                });
            }
        }

        for name in &cert.dns_names {
            let inserted = txn
                .insert_name(&NewName {
                    reversed_name: reverse_name(name),
                    not_after: cert.not_after,
                    issuer_id: issuer.id,
                    certificate_id: certificate.id,
                })
                .await?;
            if inserted {
                rows.names += 1;
            }
        }

        let inserted = txn
            .insert_fqdn_set(&NewFqdnSet {
                sha256: fqdn_set_hash(&cert.dns_names),
                not_after: cert.not_after,
                issuer_id: issuer.id,
                certificate_id: certificate.id,
            })
            .await?;
        if inserted {
            rows.fqdn_sets += 1;
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ct_log::EntryType;
    use crate::store::{MemoryStore, MirrorStore};

    const LEAF_A1: &[u8] = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/leaf_a1.der"));

    #[test]
    fn test_reverse_name() {
        assert_eq!(reverse_name("www.example.com"), "com.example.www");
        assert_eq!(reverse_name("example.com"), "com.example");
        assert_eq!(reverse_name("localhost"), "localhost");
        assert_eq!(reverse_name("*.example.com"), "com.example.*");
    }

    #[test]
    fn test_fqdn_set_hash_canonicalization() {
        assert_eq!(fqdn_set_hash(&["A.com", "a.com"]), fqdn_set_hash(&["a.com"]));
        assert_eq!(
            fqdn_set_hash(&["a.com", "b.com"]),
            fqdn_set_hash(&["b.com", "a.com"])
        );
        assert_ne!(fqdn_set_hash(&["a.com", "b.com"]), fqdn_set_hash(&["a.com"]));
    }

    #[test]
    fn test_fqdn_set_hash_matches_joined_form() {
        let expected: [u8; 32] = Sha256::digest(b"a.com,b.com").into();
        assert_eq!(fqdn_set_hash(&["B.com", "a.com"]), expected);
    }

    #[tokio::test]
    async fn test_apply_writes_every_table() {
        let store = MemoryStore::new();
        let entry = FetchedEntry {
            index: 0,
            entry_type: EntryType::X509,
            der: LEAF_A1.to_vec(),
        };

        let mut txn = store.begin().await.unwrap();
        let rows = Normalizer::new()
            .apply(txn.as_mut(), 1, 0, &entry)
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(rows.issuers, 1);
        assert_eq!(rows.certificates, 1);
        assert_eq!(rows.log_entries, 1);
        assert_eq!(rows.names, 2);
        assert_eq!(rows.fqdn_sets, 1);

        let tables = store.snapshot().await;
        assert_eq!(
            tables.names_for(1),
            vec!["com.example".to_string(), "com.example.www".to_string()]
        );
        assert_eq!(
            tables.fqdn_sets_for(1),
            vec![fqdn_set_hash(&["example.com", "www.example.com"])]
        );
    }

    #[tokio::test]
    async fn test_apply_reports_parse_errors_with_index() {
        let store = MemoryStore::new();
        let entry = FetchedEntry {
            index: 9,
            entry_type: EntryType::X509,
            der: b"junk".to_vec(),
        };

        let mut txn = store.begin().await.unwrap();
        let err = Normalizer::new()
            .apply(txn.as_mut(), 1, 9, &entry)
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Parse { index: 9, .. }));
    }
}
