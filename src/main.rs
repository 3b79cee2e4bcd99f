use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use sepbeat::auth::{Tenant, TokenManager};
use sepbeat::config::load_config;
use sepbeat::mapping::{FieldMap, RecordFlattener};
use sepbeat::poller::Poller;
use sepbeat::retrieval::RetrievalEngine;
use sepbeat::sink;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sepbeat=info".into()),
        )
        .init();

    info!("sepbeat starting...");

    let config_path =
        std::env::var("SEPBEAT_CONFIG").unwrap_or_else(|_| "sepbeat.toml".to_string());
    let mut config = load_config(&config_path)?;
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    let endpoints = config.vendor.endpoints();
    info!(
        config_path = %config_path,
        mode = ?config.poller.mode,
        token_url = %endpoints.token_url,
        export_url = %endpoints.export_url,
        search_url = %endpoints.search_url,
        "Configuration loaded"
    );

    let field_map = match &config.mapping.field_map_path {
        Some(path) => FieldMap::from_path(path).context("Failed to load field map")?,
        None => FieldMap::identity(),
    };
    info!(entries = field_map.len(), "Field map loaded");

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.poller.request_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let tokens = TokenManager::new(
        http_client.clone(),
        endpoints.token_url.clone(),
        Tenant {
            customer_id: config.vendor.customer_id.clone(),
            domain_id: config.vendor.domain_id.clone(),
        },
        config.vendor.client_id.clone(),
        config.vendor.client_secret.clone(),
    );
    let engine = RetrievalEngine::new(
        http_client.clone(),
        endpoints,
        tokens,
        RecordFlattener::new(Arc::new(field_map)),
    )
    .with_search_clock_skew(Duration::seconds(config.poller.search_clock_skew_secs));

    let event_sink = sink::from_config(&config.sink, http_client);
    let poller = Poller::new(engine, event_sink, &config.poller, Utc::now());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let status = poller.status();
    let handle = poller.start(shutdown_rx);

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // A cycle in progress runs to completion before the loop sees the signal
    let _ = shutdown_tx.send(true);
    handle.await.context("Poller task panicked")?;

    let status = status.lock().await;
    info!(
        cycles = status.cycle_count,
        errors = status.error_count,
        published = status.published,
        last_run = ?status.last_run,
        last_error = ?status.last_error,
        "sepbeat stopped"
    );

    Ok(())
}
