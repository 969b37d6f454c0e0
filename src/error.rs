// src/error.rs
//! Runtime error taxonomy for the mirroring pipeline.
//!
//! None of these stop the mirror: a failing window or chunk is logged,
//! counted, and dropped. Only startup errors (surfaced as `anyhow::Error`
//! from `main`) terminate the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    /// The log server or network failed while fetching a window.
    #[error("fetching entries {start}-{end}: {source:#}")]
    Fetch {
        start: u64,
        end: u64,
        #[source]
        source: anyhow::Error,
    },

    /// An entry's self-reported index disagrees with its position in the chunk.
    #[error("mismatched indexes: {expected} calculated vs {reported} in entry")]
    IndexMismatch { expected: u64, reported: u64 },

    /// Certificate or precert TBS bytes could not be parsed.
    #[error("parsing entry {index}: {reason}")]
    Parse { index: u64, reason: String },

    /// A different certificate is already recorded at this log position.
    #[error(
        "log {log_id} index {index} already maps to certificate {existing}, refusing certificate {incoming}"
    )]
    Conflict {
        log_id: i64,
        index: u64,
        existing: i64,
        incoming: i64,
    },

    #[error("storage: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl MirrorError {
    /// Stable label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            MirrorError::Fetch { .. } => "fetch",
            MirrorError::IndexMismatch { .. } => "index_mismatch",
            MirrorError::Parse { .. } => "parse",
            MirrorError::Conflict { .. } => "conflict",
            MirrorError::Storage(_) => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        let err = MirrorError::IndexMismatch {
            expected: 5,
            reported: 6,
        };
        assert_eq!(err.kind(), "index_mismatch");
        assert_eq!(
            err.to_string(),
            "mismatched indexes: 5 calculated vs 6 in entry"
        );

        let err = MirrorError::from(anyhow::anyhow!("connection reset"));
        assert_eq!(err.kind(), "storage");
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_conflict_message_names_both_certificates() {
        let err = MirrorError::Conflict {
            log_id: 1,
            index: 42,
            existing: 7,
            incoming: 9,
        };
        let msg = err.to_string();
        assert!(msg.contains("index 42"));
        assert!(msg.contains("certificate 7"));
        assert!(msg.contains("certificate 9"));
    }
}
