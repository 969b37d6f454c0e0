// src/ct_log/source.rs
use anyhow::Result;
use async_trait::async_trait;

/// Kind of certificate material carried by a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Full DER X.509 certificate
    X509,
    /// DER TBSCertificate of a precertificate
    Precert,
}

impl EntryType {
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            0 => Some(EntryType::X509),
            1 => Some(EntryType::Precert),
            _ => None,
        }
    }
}

/// One log entry as handed to the writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedEntry {
    /// Position the source reports for this entry
    pub index: u64,
    pub entry_type: EntryType,
    pub der: Vec<u8>,
}

/// Where log entries come from.
///
/// Implementations return entries in ascending index order covering the
/// whole requested range, or an error.
#[async_trait]
pub trait EntrySource: Send + Sync {
    fn base_url(&self) -> &str;

    /// Current number of entries in the log
    async fn tree_size(&self) -> Result<u64>;

    /// Entries `start..=end`
    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<FetchedEntry>>;
}
