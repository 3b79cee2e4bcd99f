//! Downstream event sinks.
//!
//! The poller hands every flattened record to an [`EventSink`] as a
//! [`SinkEvent`], one `publish` call per record, awaited before the next
//! record is processed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::config::SinkConfig;
use crate::mapping::FlatRecord;

/// A flattened record ready for publishing.
#[derive(Clone, Debug, Serialize)]
pub struct SinkEvent {
    /// UUIDv7 identifier (time-ordered)
    #[serde(rename = "eventId")]
    pub event_id: String,

    /// Publish time, not the vendor's own event time
    pub timestamp: DateTime<Utc>,

    pub fields: FlatRecord,
}

impl SinkEvent {
    /// Wraps `fields`, stamping the current time.
    pub fn stamped(fields: FlatRecord) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            fields,
        }
    }
}

/// Destination for published events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: SinkEvent) -> Result<()>;
}

/// Writes each event as one JSON line on stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

#[async_trait]
impl EventSink for StdoutSink {
    async fn publish(&self, event: SinkEvent) -> Result<()> {
        let mut line = serde_json::to_vec(&event).context("Failed to serialize event to JSON")?;
        line.push(b'\n');

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(&line)
            .await
            .context("Failed to write event to stdout")?;
        stdout.flush().await.context("Failed to flush stdout")?;
        Ok(())
    }
}

/// POSTs each event as JSON to an HTTP collector.
pub struct HttpSink {
    url: String,
    http_client: reqwest::Client,
}

impl HttpSink {
    pub fn new(url: String, http_client: reqwest::Client) -> Self {
        Self { url, http_client }
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn publish(&self, event: SinkEvent) -> Result<()> {
        let response = self
            .http_client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&event)
            .send()
            .await
            .context("Failed to send event to collector")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            anyhow::bail!("Collector returned error status {}: {}", status, body);
        }

        debug!(event_id = %event.event_id, "Published event");
        Ok(())
    }
}

/// Builds the sink named by the configuration.
pub fn from_config(config: &SinkConfig, http_client: reqwest::Client) -> Arc<dyn EventSink> {
    match config {
        SinkConfig::Stdout => Arc::new(StdoutSink),
        SinkConfig::Http { url } => Arc::new(HttpSink::new(url.clone(), http_client)),
    }
}
