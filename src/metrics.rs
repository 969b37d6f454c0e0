//! Prometheus metrics for ct-mirror
//!
//! [`MirrorMetrics`] is an explicit handle passed into every component that
//! reports. It is purely observational; nothing reads it back to make a
//! control-flow decision.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::ct_log::LogHealth;
use crate::store::RowCounts;

/// Row tables as they appear in the `table` label.
pub const TABLES: [&str; 6] = [
    "logs",
    "issuers",
    "certificates",
    "log_entries",
    "names",
    "fqdn_sets",
];

#[derive(Clone)]
pub struct MirrorMetrics {
    inserts: IntCounterVec,
    chunks: IntCounterVec,
    chunk_errors: IntCounterVec,
    fetch_errors: IntCounter,
    queue_depth: IntGauge,
    next_index: IntGaugeVec,
    log_health: IntGaugeVec,
}

impl MirrorMetrics {
    /// Create the metric set and register it on `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let inserts = IntCounterVec::new(
            Opts::new("ctmirror_inserts_total", "Total number of rows inserted"),
            &["table"],
        )?;
        let chunks = IntCounterVec::new(
            Opts::new("ctmirror_chunks_total", "Chunks handled by the writer"),
            &["outcome"], // committed or dropped
        )?;
        let chunk_errors = IntCounterVec::new(
            Opts::new(
                "ctmirror_chunk_errors_total",
                "Dropped chunks and windows by error kind",
            ),
            &["kind"],
        )?;
        let fetch_errors = IntCounter::new(
            "ctmirror_fetch_errors_total",
            "Total number of failed window fetches",
        )?;
        let queue_depth = IntGauge::new(
            "ctmirror_queue_depth",
            "Completed chunks waiting for the writer",
        )?;
        let next_index = IntGaugeVec::new(
            Opts::new(
                "ctmirror_next_index",
                "Next log index to be handed to a fetch worker",
            ),
            &["log"],
        )?;
        let log_health = IntGaugeVec::new(
            Opts::new(
                "ctmirror_log_health",
                "Fetch health per log: 0 healthy, 1 degraded, 2 failed",
            ),
            &["log"],
        )?;

        // Export every table from the first scrape, even before its first insert
        for table in TABLES {
            inserts.with_label_values(&[table]);
        }

        registry.register(Box::new(inserts.clone()))?;
        registry.register(Box::new(chunks.clone()))?;
        registry.register(Box::new(chunk_errors.clone()))?;
        registry.register(Box::new(fetch_errors.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(next_index.clone()))?;
        registry.register(Box::new(log_health.clone()))?;

        Ok(Self {
            inserts,
            chunks,
            chunk_errors,
            fetch_errors,
            queue_depth,
            next_index,
            log_health,
        })
    }

    /// Add committed row counts, one increment per inserted row
    pub fn record_rows(&self, rows: &RowCounts) {
        for (table, count) in rows.by_table() {
            if count > 0 {
                self.inserts.with_label_values(&[table]).inc_by(count);
            }
        }
    }

    pub fn chunk_committed(&self) {
        self.chunks.with_label_values(&["committed"]).inc();
    }

    pub fn chunk_dropped(&self, kind: &str) {
        self.chunks.with_label_values(&["dropped"]).inc();
        self.chunk_errors.with_label_values(&[kind]).inc();
    }

    pub fn fetch_failed(&self) {
        self.fetch_errors.inc();
        self.chunk_errors.with_label_values(&["fetch"]).inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub fn set_next_index(&self, log_url: &str, index: u64) {
        self.next_index
            .with_label_values(&[log_url])
            .set(index as i64);
    }

    pub fn set_log_health(&self, log_url: &str, health: LogHealth) {
        let value = match health {
            LogHealth::Healthy => 0,
            LogHealth::Degraded => 1,
            LogHealth::Failed => 2,
        };
        self.log_health.with_label_values(&[log_url]).set(value);
    }

    /// Current health gauge value for `log_url`
    pub fn log_health(&self, log_url: &str) -> i64 {
        self.log_health.with_label_values(&[log_url]).get()
    }

    /// Rows inserted into `table` so far
    pub fn inserted(&self, table: &str) -> u64 {
        self.inserts.with_label_values(&[table]).get()
    }

    /// Chunks with the given outcome so far
    pub fn chunks(&self, outcome: &str) -> u64 {
        self.chunks.with_label_values(&[outcome]).get()
    }

    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.get()
    }
}

/// Export metrics in Prometheus text format
pub fn export_metrics(registry: &Registry) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

/// Build the scrape router serving `registry` at `path`
pub fn router(registry: Registry, path: &str) -> Router {
    Router::new()
        .route(path, get(scrape))
        .with_state(registry)
}

async fn scrape(State(registry): State<Registry>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        export_metrics(&registry),
    )
}

/// Bind the metrics listener. Binding happens up front so that a bad
/// address is a startup error rather than a silent background failure.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid metrics listen address {:?}", addr))?;
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener on {}", addr))
}

/// Serve scrape requests until the process exits
pub async fn serve(listener: TcpListener, registry: Registry, path: String) {
    if let Ok(addr) = listener.local_addr() {
        info!("Serving metrics on http://{}{}", addr, path);
    }
    if let Err(e) = axum::serve(listener, router(registry, &path)).await {
        warn!("Metrics endpoint stopped: {}", e);
    }
}
