// src/cert_parser.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::*;

use crate::ct_log::EntryType;

/// Parsed certificate with the fields the mirror stores
#[derive(Debug, Clone)]
pub struct ParsedCert {
    /// SHA-256 over the full DER certificate, or the precert TBS bytes
    pub sha256: [u8; 32],
    /// Big-endian serial number without sign padding
    pub serial: Vec<u8>,
    pub not_after: DateTime<Utc>,
    /// Issuer distinguished name, as rendered by x509-parser
    pub issuer: String,
    /// DNS names from the Subject Alternative Name extension, in certificate order
    pub dns_names: Vec<String>,
    pub is_precert: bool,
}

impl ParsedCert {
    pub fn fingerprint(&self) -> String {
        hex::encode(self.sha256)
    }
}

/// Certificate parser for CT log entries
pub struct CertificateParser;

impl CertificateParser {
    /// Parse the bytes carried by a log entry of the given type
    pub fn parse_entry(entry_type: EntryType, der: &[u8]) -> Result<ParsedCert> {
        match entry_type {
            EntryType::X509 => Self::parse_certificate(der),
            EntryType::Precert => Self::parse_precert_tbs(der),
        }
    }

    /// Parse a full DER-encoded X.509 certificate
    pub fn parse_certificate(der: &[u8]) -> Result<ParsedCert> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| anyhow::anyhow!("Failed to parse certificate from DER: {:?}", e))?;

        Self::extract(&cert.tbs_certificate, der, false)
    }

    /// Parse the TBSCertificate of a precertificate entry
    pub fn parse_precert_tbs(der: &[u8]) -> Result<ParsedCert> {
        let (_, tbs) = TbsCertificate::from_der(der)
            .map_err(|e| anyhow::anyhow!("Failed to parse precert TBSCertificate: {:?}", e))?;

        Self::extract(&tbs, der, true)
    }

    fn extract(tbs: &TbsCertificate, der: &[u8], is_precert: bool) -> Result<ParsedCert> {
        let sha256: [u8; 32] = Sha256::digest(der).into();

        let mut dns_names = Vec::new();
        for ext in tbs.extensions() {
            if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
                for general_name in &san.general_names {
                    if let GeneralName::DNSName(dns_name) = general_name {
                        dns_names.push(dns_name.to_string());
                    }
                }
            }
        }

        let not_after_ts = tbs.validity().not_after.timestamp();
        let not_after = DateTime::<Utc>::from_timestamp(not_after_ts, 0)
            .with_context(|| format!("notAfter out of range: {}", not_after_ts))?;

        Ok(ParsedCert {
            sha256,
            serial: tbs.serial.to_bytes_be(),
            not_after,
            issuer: tbs.issuer().to_string(),
            dns_names,
            is_precert,
        })
    }
}
