// src/ct_log/leaf.rs
//! RFC 6962 MerkleTreeLeaf decoding.
//!
//! ```text
//! version(1) leaf_type(1) timestamp(8) entry_type(2)
//!   x509_entry:    cert_len(3) cert
//!   precert_entry: issuer_key_hash(32) tbs_len(3) tbs
//! extensions_len(2) extensions
//! ```

use anyhow::{bail, Context, Result};
use base64::Engine;

use super::source::EntryType;

const HEADER_LEN: usize = 12;
const ISSUER_KEY_HASH_LEN: usize = 32;

/// Decode a base64 `leaf_input` into its entry type and certificate bytes
pub fn decode_leaf_input(leaf_input: &str) -> Result<(EntryType, Vec<u8>)> {
    let leaf = base64::engine::general_purpose::STANDARD
        .decode(leaf_input)
        .context("Failed to decode base64 leaf_input")?;
    let (entry_type, der) = decode_leaf(&leaf)?;
    Ok((entry_type, der.to_vec()))
}

/// Decode a raw MerkleTreeLeaf
pub fn decode_leaf(leaf: &[u8]) -> Result<(EntryType, &[u8])> {
    if leaf.len() < HEADER_LEN {
        bail!("Leaf input too short: {} bytes", leaf.len());
    }
    if leaf[0] != 0 {
        bail!("Unsupported leaf version {}", leaf[0]);
    }
    if leaf[1] != 0 {
        bail!("Unrecognized leaf type {}", leaf[1]);
    }

    let wire_type = u16::from_be_bytes([leaf[10], leaf[11]]);
    let entry_type = match EntryType::from_wire(wire_type) {
        Some(t) => t,
        None => bail!("Unrecognized entry type {}", wire_type),
    };

    let body = match entry_type {
        EntryType::X509 => &leaf[HEADER_LEN..],
        EntryType::Precert => {
            if leaf.len() < HEADER_LEN + ISSUER_KEY_HASH_LEN {
                bail!("precert_entry too short for issuer key hash");
            }
            &leaf[HEADER_LEN + ISSUER_KEY_HASH_LEN..]
        }
    };

    Ok((entry_type, read_u24_prefixed(body)?))
}

fn read_u24_prefixed(buf: &[u8]) -> Result<&[u8]> {
    if buf.len() < 3 {
        bail!("Missing 24-bit length prefix");
    }
    let len = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | (buf[2] as usize);
    if buf.len() < 3 + len {
        bail!(
            "Certificate truncated: expected {} bytes, have {}",
            len,
            buf.len() - 3
        );
    }
    Ok(&buf[3..3 + len])
}

/// Build a MerkleTreeLeaf, the inverse of [`decode_leaf`]
pub fn encode_leaf(entry_type: EntryType, timestamp_ms: u64, der: &[u8]) -> Vec<u8> {
    let mut leaf = Vec::with_capacity(HEADER_LEN + ISSUER_KEY_HASH_LEN + 5 + der.len());
    leaf.push(0); // v1
    leaf.push(0); // timestamped_entry
    leaf.extend_from_slice(&timestamp_ms.to_be_bytes());
    match entry_type {
        EntryType::X509 => leaf.extend_from_slice(&0u16.to_be_bytes()),
        EntryType::Precert => {
            leaf.extend_from_slice(&1u16.to_be_bytes());
            leaf.extend_from_slice(&[0u8; ISSUER_KEY_HASH_LEN]);
        }
    }
    let len = der.len() as u32;
    leaf.extend_from_slice(&len.to_be_bytes()[1..]);
    leaf.extend_from_slice(der);
    leaf.extend_from_slice(&[0, 0]); // no extensions
    leaf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_x509_entry() {
        let leaf = encode_leaf(EntryType::X509, 1_700_000_000_000, b"certificate");
        let (entry_type, der) = decode_leaf(&leaf).unwrap();
        assert_eq!(entry_type, EntryType::X509);
        assert_eq!(der, b"certificate");
    }

    #[test]
    fn test_decode_precert_entry_skips_issuer_key_hash() {
        let leaf = encode_leaf(EntryType::Precert, 1, b"tbs-bytes");
        let (entry_type, der) = decode_leaf(&leaf).unwrap();
        assert_eq!(entry_type, EntryType::Precert);
        assert_eq!(der, b"tbs-bytes");
    }

    #[test]
    fn test_decode_base64_leaf_input() {
        let leaf = encode_leaf(EntryType::X509, 1, &[1, 2, 3]);
        let encoded = base64::engine::general_purpose::STANDARD.encode(leaf);
        let (entry_type, der) = decode_leaf_input(&encoded).unwrap();
        assert_eq!(entry_type, EntryType::X509);
        assert_eq!(der, vec![1, 2, 3]);

        assert!(decode_leaf_input("!!not base64!!").is_err());
    }

    #[test]
    fn test_reject_short_and_truncated_leaves() {
        assert!(decode_leaf(b"short").is_err());

        let mut leaf = encode_leaf(EntryType::X509, 1, b"certificate");
        leaf.truncate(HEADER_LEN + 3 + 4);
        let err = decode_leaf(&leaf).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_reject_unknown_types() {
        let mut leaf = encode_leaf(EntryType::X509, 1, b"c");
        leaf[11] = 7;
        assert!(decode_leaf(&leaf).is_err());

        let mut leaf = encode_leaf(EntryType::X509, 1, b"c");
        leaf[1] = 1;
        assert!(decode_leaf(&leaf).is_err());
    }
}
