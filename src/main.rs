// src/main.rs
use clap::Parser;
use ct_mirror::cli::Cli;
use ct_mirror::config::Config;
use ct_mirror::ct_log::CtLogClient;
use ct_mirror::metrics::{self, MirrorMetrics};
use ct_mirror::mirror::MirrorCoordinator;
use ct_mirror::store::{PostgresStore, StoreHandle};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Validate arguments
    cli.validate()?;

    // Load config file and apply CLI overrides
    let config = Config::load(&cli)?;

    // Initialize logging
    let log_level = cli.log_level().unwrap_or(config.logging.level.as_str());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    tracing::info!("Starting ct-mirror...");

    let log_urls = config.log_urls()?;
    tracing::info!("Mirroring {} CT logs", log_urls.len());

    // Metrics
    let registry = Registry::new();
    let mirror_metrics = MirrorMetrics::new(&registry)?;

    if config.metrics.enabled {
        let listener = metrics::bind(&config.metrics.listen_addr).await?;
        tokio::spawn(metrics::serve(
            listener,
            registry.clone(),
            config.metrics.path.clone(),
        ));
    } else {
        tracing::debug!("Metrics endpoint disabled");
    }

    // Database
    let postgres = Arc::new(
        PostgresStore::new(&config.database.url, config.database.max_connections).await?,
    );
    postgres.migrate().await?;
    let store = StoreHandle::new(postgres.clone());

    // Start one fetch pool per log, all feeding the single writer
    let mut coordinator = MirrorCoordinator::new(
        store,
        mirror_metrics,
        config.mirror.coordinator_config(),
    );

    for url in log_urls {
        let client = CtLogClient::new(url.clone())?
            .with_retries(config.mirror.fetch_retries, Duration::from_secs(1));
        let started = coordinator.add_log(Arc::new(client)).await?;
        tracing::info!(
            "Log {} has id {}, resuming at index {}",
            url,
            started.log_id,
            started.resume.next_index
        );
    }

    // Ctrl-C stops the fetchers; queued chunks are still written
    let shutdown = coordinator.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => shutdown.trigger(),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    coordinator.run().await;

    postgres.close().await;
    tracing::info!("ct-mirror stopped");

    Ok(())
}
