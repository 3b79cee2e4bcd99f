//! Draining vendor events for a time window.
//!
//! The vendor offers two pagination schemes, selected once at startup:
//!
//! - **Export** ([`export`]): the same request is resent per category; the
//!   server tracks progress and an empty array signals the end.
//! - **Search** ([`search`]): one request stream for all categories, paged
//!   with a `next` offset until the server-reported `total` is reached.
//!
//! Both flatten every record through the [`RecordFlattener`] and hand it to a
//! [`RecordSink`] as soon as its batch is decoded.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::{AuthError, TokenManager, CUSTOMER_HEADER, DOMAIN_HEADER};
use crate::config::Endpoints;
use crate::mapping::{FlatRecord, RecordFlattener};

mod event_type;
pub mod export;
pub mod search;

pub use event_type::EventType;

/// Product identifier sent to the vendor.
pub const PRODUCT: &str = "SAEP";
const PRODUCT_HEADER: &str = "x-epmp-product";

/// Errors that abort a single drain.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("access token rejected with status {status}")]
    Unauthorized { status: u16 },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("search stalled at next={next} before reaching total={total}")]
    Stalled { next: u64, total: u64 },
}

/// Which pagination scheme the poller drives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// One stateful export stream per category.
    #[default]
    Export,
    /// One cursor-paged search over all categories.
    Search,
}

/// Half-open interval `[start, end)` of event time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("window start {start} is after end {end}")]
pub struct InvertedWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, InvertedWindow> {
        if start > end {
            return Err(InvertedWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window from `start` to `now`, collapsed to empty if the clock went backwards.
    pub fn ending_at(start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            start,
            end: now.max(start),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// Counters for one completed drain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub records: u64,
    pub batches: u64,
}

/// Receives flattened records as a drain produces them.
#[async_trait]
pub trait RecordSink: Send {
    async fn accept(&mut self, record: FlatRecord);
}

#[async_trait]
impl RecordSink for Vec<FlatRecord> {
    async fn accept(&mut self, record: FlatRecord) {
        self.push(record);
    }
}

/// HTTP client for the vendor export and search endpoints.
///
/// Owns the [`TokenManager`]; a token that is about to expire is refreshed
/// before a request, and a 401 response triggers one re-acquire and retry.
pub struct RetrievalEngine {
    http_client: reqwest::Client,
    endpoints: Endpoints,
    tokens: TokenManager,
    flattener: RecordFlattener,
    search_clock_skew: Duration,
}

impl RetrievalEngine {
    pub fn new(
        http_client: reqwest::Client,
        endpoints: Endpoints,
        tokens: TokenManager,
        flattener: RecordFlattener,
    ) -> Self {
        Self {
            http_client,
            endpoints,
            tokens,
            flattener,
            search_clock_skew: Duration::seconds(search::DEFAULT_CLOCK_SKEW_SECS),
        }
    }

    /// Overrides how far search windows are shifted into the past.
    pub fn with_search_clock_skew(mut self, skew: Duration) -> Self {
        self.search_clock_skew = skew;
        self
    }

    /// Acquires a fresh credential for the coming cycle.
    pub async fn authenticate(&mut self) -> Result<(), AuthError> {
        self.tokens.acquire().await.map(|_| ())
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// POSTs a JSON body and returns the response text of a 2xx reply.
    async fn post_json<T: Serialize + ?Sized>(
        &mut self,
        url: &str,
        body: &T,
        product: Option<&str>,
    ) -> Result<String, RetrievalError> {
        let payload = serde_json::to_vec(body).map_err(RetrievalError::Encode)?;
        let mut retried = false;

        loop {
            let token = if retried {
                self.tokens.acquire().await?.token.clone()
            } else {
                self.tokens.fresh_token().await?
            };

            let tenant = self.tokens.tenant();
            let mut request = self
                .http_client
                .post(url)
                .bearer_auth(&token)
                .header("Content-Type", "application/json")
                .header("Accept", "application/json")
                .header(DOMAIN_HEADER, &tenant.domain_id)
                .header(CUSTOMER_HEADER, &tenant.customer_id);
            if let Some(product) = product {
                request = request.header(PRODUCT_HEADER, product);
            }

            let response = request.body(payload.clone()).send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !retried {
                warn!(url = %url, "Access token rejected, re-acquiring");
                retried = true;
                continue;
            }

            let text = response.text().await?;
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(RetrievalError::Unauthorized {
                    status: status.as_u16(),
                });
            }
            if !status.is_success() {
                error!(url = %url, status = status.as_u16(), body = %text, "Vendor returned non-2xx status");
                return Err(RetrievalError::Server {
                    status: status.as_u16(),
                    body: text,
                });
            }

            return Ok(text);
        }
    }
}
