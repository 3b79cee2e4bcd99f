//! Bulk export: one stateful stream per event category.
//!
//! The export endpoint keeps the read position server-side. The identical
//! request is sent again and again; each reply carries the next batch and an
//! empty body or `[]` marks the end of the stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::{DrainStats, EventType, RecordSink, RetrievalEngine, RetrievalError, TimeWindow, PRODUCT};
use crate::mapping::RawRecord;

/// `YYYY-MM-DDTHH:mm:ss.sssZ`
const EXPORT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Body of an export request.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub batch_size: u32,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub start_date: String,
    pub end_date: String,
}

impl ExportRequest {
    pub fn new(window: &TimeWindow, event_type: EventType, batch_size: u32) -> Self {
        Self {
            batch_size,
            event_type: event_type.as_str(),
            start_date: format_export_time(window.start()),
            end_date: format_export_time(window.end()),
        }
    }
}

pub fn format_export_time(instant: DateTime<Utc>) -> String {
    instant.format(EXPORT_TIME_FORMAT).to_string()
}

/// Decodes one export reply. `None` means the stream is exhausted.
fn decode_batch(body: &str) -> Result<Option<Vec<RawRecord>>, RetrievalError> {
    let body = body.trim();
    if body.is_empty() || body == "[]" {
        return Ok(None);
    }
    let records: Vec<RawRecord> = serde_json::from_str(body).map_err(RetrievalError::Decode)?;
    if records.is_empty() {
        return Ok(None);
    }
    Ok(Some(records))
}

impl RetrievalEngine {
    /// Drains every `event_type` event in `window` through the export endpoint.
    ///
    /// Records reach `sink` batch by batch. A failure part-way leaves the
    /// records already delivered in place.
    pub async fn drain_export(
        &mut self,
        window: &TimeWindow,
        event_type: EventType,
        batch_size: u32,
        sink: &mut dyn RecordSink,
    ) -> Result<DrainStats, RetrievalError> {
        let request = ExportRequest::new(window, event_type, batch_size);
        let url = self.endpoints.export_url.clone();
        let mut stats = DrainStats::default();

        debug!(event_type = %event_type, start = %request.start_date, end = %request.end_date, "Starting export drain");

        loop {
            let body = self.post_json(&url, &request, Some(PRODUCT)).await?;
            let Some(records) = decode_batch(&body)? else {
                break;
            };

            stats.batches += 1;
            for raw in &records {
                sink.accept(self.flattener.flatten(raw)).await;
                stats.records += 1;
            }
            debug!(event_type = %event_type, batch = stats.batches, size = records.len(), "Export batch consumed");
        }

        info!(
            event_type = %event_type,
            records = stats.records,
            batches = stats.batches,
            "Export drain complete"
        );
        Ok(stats)
    }
}
