// src/ct_log/client.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::leaf::decode_leaf_input;
use super::source::{EntrySource, FetchedEntry};
use super::types::{GetEntriesResponse, RawEntry, SignedTreeHead};

/// Validate a log base URL and strip any trailing slash.
///
/// Logs must be reached over https; anything else is a configuration error.
pub fn normalize_log_url(raw: &str) -> Result<String> {
    let url = url::Url::parse(raw).with_context(|| format!("not a URL: {:?}", raw))?;
    if url.scheme() != "https" {
        anyhow::bail!("invalid URL scheme {:?} in {:?}", url.scheme(), raw);
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// HTTP client for Certificate Transparency log RFC 6962 API
pub struct CtLogClient {
    base_url: String,
    http_client: reqwest::Client,
    max_retries: u32,
    initial_backoff: Duration,
}

impl CtLogClient {
    /// Create a new CT log client
    pub fn new(base_url: String) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        })
    }

    /// Attempts per request and the first retry delay
    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.initial_backoff = initial_backoff;
        self
    }

    /// Get Signed Tree Head (current log size and timestamp)
    /// Endpoint: GET {base_url}/ct/v1/get-sth
    pub async fn get_sth(&self) -> Result<SignedTreeHead> {
        let url = format!("{}/ct/v1/get-sth", self.base_url);

        debug!("Fetching STH from {}", url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch STH")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "STH request failed with status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }

        let sth: SignedTreeHead = response
            .json()
            .await
            .context("Failed to parse STH JSON")?;

        debug!(
            "STH received: tree_size={}, timestamp={}",
            sth.tree_size, sth.timestamp
        );

        Ok(sth)
    }

    /// Get one page of entries; logs may return fewer than requested
    /// Endpoint: GET {base_url}/ct/v1/get-entries?start={start}&end={end}
    pub async fn get_raw_entries(&self, start: u64, end: u64) -> Result<Vec<RawEntry>> {
        let url = format!(
            "{}/ct/v1/get-entries?start={}&end={}",
            self.base_url, start, end
        );

        debug!("Fetching entries {}-{} from {}", start, end, self.base_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch entries")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                warn!("Rate limited by CT log: {}", self.base_url);
                anyhow::bail!("Rate limited (429)");
            }

            anyhow::bail!(
                "Get entries request failed with status {}: {}",
                status,
                body
            );
        }

        let entries_response: GetEntriesResponse = response
            .json()
            .await
            .context("Failed to parse entries JSON")?;

        debug!(
            "Received {} entries from {}",
            entries_response.entries.len(),
            self.base_url
        );

        Ok(entries_response.entries)
    }

    /// Get one page of entries with retry logic and exponential backoff
    pub async fn get_raw_entries_with_retry(&self, start: u64, end: u64) -> Result<Vec<RawEntry>> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match self.get_raw_entries(start, end).await {
                Ok(entries) => return Ok(entries),
                Err(e) => {
                    retries += 1;

                    if retries >= self.max_retries {
                        return Err(e.context(format!("Failed after {} attempts", retries)));
                    }

                    warn!(
                        "Error fetching entries (attempt {}/{}): {}. Retrying in {:?}",
                        retries, self.max_retries, e, backoff
                    );

                    tokio::time::sleep(backoff).await;

                    // Exponential backoff with max 60 seconds
                    backoff = std::cmp::min(backoff * 2, Duration::from_secs(60));
                }
            }
        }
    }

    /// Get STH with retry logic
    pub async fn get_sth_with_retry(&self) -> Result<SignedTreeHead> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match self.get_sth().await {
                Ok(sth) => return Ok(sth),
                Err(e) => {
                    retries += 1;

                    if retries >= self.max_retries {
                        return Err(e.context(format!("Failed after {} attempts", retries)));
                    }

                    warn!(
                        "Error fetching STH (attempt {}/{}): {}. Retrying in {:?}",
                        retries, self.max_retries, e, backoff
                    );

                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_secs(60));
                }
            }
        }
    }
}

#[async_trait]
impl EntrySource for CtLogClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn tree_size(&self) -> Result<u64> {
        Ok(self.get_sth_with_retry().await?.tree_size)
    }

    /// Pages through get-entries until the whole range is collected,
    /// numbering entries from `start`
    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<FetchedEntry>> {
        if end < start {
            anyhow::bail!("empty range {}-{}", start, end);
        }

        let mut entries = Vec::with_capacity((end - start + 1) as usize);
        let mut next = start;

        while next <= end {
            let page = self.get_raw_entries_with_retry(next, end).await?;
            let wanted = end - next + 1;

            if page.is_empty() {
                anyhow::bail!("log returned no entries for {}-{}", next, end);
            }
            if page.len() as u64 > wanted {
                anyhow::bail!(
                    "log returned {} entries for {}-{} ({} requested)",
                    page.len(),
                    next,
                    end,
                    wanted
                );
            }

            for raw in page {
                let (entry_type, der) = decode_leaf_input(&raw.leaf_input)
                    .with_context(|| format!("decoding leaf at index {}", next))?;
                entries.push(FetchedEntry {
                    index: next,
                    entry_type,
                    der,
                });
                next += 1;
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_log_url() {
        assert_eq!(
            normalize_log_url("https://ct.example.com/logs/argon2025/").unwrap(),
            "https://ct.example.com/logs/argon2025"
        );
        assert_eq!(
            normalize_log_url("https://ct.example.com/logs/argon2025").unwrap(),
            "https://ct.example.com/logs/argon2025"
        );
        assert_eq!(
            normalize_log_url("https://ct.example.com").unwrap(),
            "https://ct.example.com"
        );
    }

    #[test]
    fn test_normalize_rejects_insecure_and_garbage() {
        let err = normalize_log_url("http://ct.example.com/log").unwrap_err();
        assert!(err.to_string().contains("invalid URL scheme"));
        assert!(normalize_log_url("ct.example.com/log").is_err());
    }

    #[test]
    fn test_client_strips_trailing_slash() {
        let client = CtLogClient::new("https://ct.example.com/log/".to_string()).unwrap();
        assert_eq!(client.base_url(), "https://ct.example.com/log");
    }
}
