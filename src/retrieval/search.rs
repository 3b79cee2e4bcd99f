//! Cursor search: all categories in one stream, paged by offset.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{DrainStats, EventType, RecordSink, RetrievalEngine, RetrievalError, TimeWindow, PRODUCT};
use crate::mapping::RawRecord;

/// `YYYY-MM-DDTHH:mm:ss.sss+00:00`
const SEARCH_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f+00:00";

/// The search endpoint's clock runs behind ours; windows reaching "now"
/// are rejected intermittently unless shifted back by this much.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 10;

/// Body of a search request.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub limit: u32,
    pub feature_name: &'static str,
    pub start_date: String,
    pub end_date: String,
    pub product: &'static str,
    pub next: u64,
}

impl SearchRequest {
    /// Builds the request for offset `next`, shifting both window ends back by `skew`.
    pub fn new(window: &TimeWindow, skew: Duration, limit: u32, next: u64) -> Self {
        Self {
            limit,
            feature_name: EventType::All.as_str(),
            start_date: format_search_time(window.start() - skew),
            end_date: format_search_time(window.end() - skew),
            product: PRODUCT,
            next,
        }
    }
}

/// Body of a search reply. A 2xx body without `total` or `events` is not a
/// page and fails to decode.
#[derive(Deserialize, Debug)]
pub struct SearchResponse {
    pub total: u64,
    #[serde(default)]
    pub next: u64,
    pub events: Vec<RawRecord>,
}

pub fn format_search_time(instant: DateTime<Utc>) -> String {
    instant.format(SEARCH_TIME_FORMAT).to_string()
}

impl RetrievalEngine {
    /// Drains every event in `window` through the search endpoint.
    ///
    /// Pages until the number of consumed events reaches the latest `total`
    /// the server reported. A page with no events before that point fails
    /// with [`RetrievalError::Stalled`].
    pub async fn drain_search(
        &mut self,
        window: &TimeWindow,
        batch_size: u32,
        sink: &mut dyn RecordSink,
    ) -> Result<DrainStats, RetrievalError> {
        let url = self.endpoints.search_url.clone();
        let mut stats = DrainStats::default();
        let mut next: u64 = 0;

        loop {
            let request = SearchRequest::new(window, self.search_clock_skew, batch_size, next);
            let body = self.post_json(&url, &request, None).await?;
            let response: SearchResponse =
                serde_json::from_str(&body).map_err(RetrievalError::Decode)?;

            let count = response.events.len() as u64;
            for raw in &response.events {
                sink.accept(self.flattener.flatten(raw)).await;
            }
            stats.batches += 1;
            stats.records += count;
            next += count;

            debug!(
                next,
                total = response.total,
                server_next = response.next,
                batch = count,
                "Search batch consumed"
            );

            if next >= response.total {
                break;
            }
            if count == 0 {
                return Err(RetrievalError::Stalled {
                    next,
                    total: response.total,
                });
            }
        }

        info!(records = stats.records, batches = stats.batches, "Search drain complete");
        Ok(stats)
    }
}
