use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::retrieval::search::DEFAULT_CLOCK_SKEW_SECS;
use crate::retrieval::RetrievalMode;

pub const DEFAULT_TOKEN_URL: &str = "https://api.sep.securitycloud.symantec.com/v1/oauth2/tokens";
pub const DEFAULT_EXPORT_URL: &str =
    "https://usea1.r3.securitycloud.symantec.com/r3_epmp_i/sccs/v1/events/export";
pub const DEFAULT_SEARCH_URL: &str = "https://api.sep.securitycloud.symantec.com/v1/event-search";

/// Upper bound for `poller.search_clock_skew_secs` (one hour).
pub const MAX_SEARCH_CLOCK_SKEW_SECS: i64 = 3600;

/// Environment variable that overrides `vendor.client_secret`.
pub const CLIENT_SECRET_ENV: &str = "SEPBEAT_CLIENT_SECRET";

/// Complete sepbeat configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SepbeatConfig {
    pub vendor: VendorConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

/// Vendor tenant, client credentials and endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct VendorConfig {
    pub customer_id: String,
    pub domain_id: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// When set, all three endpoints are derived from this base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_export_url")]
    pub export_url: String,
    #[serde(default = "default_search_url")]
    pub search_url: String,
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_export_url() -> String {
    DEFAULT_EXPORT_URL.to_string()
}

fn default_search_url() -> String {
    DEFAULT_SEARCH_URL.to_string()
}

impl VendorConfig {
    pub fn endpoints(&self) -> Endpoints {
        match &self.base_url {
            Some(base) => Endpoints::from_base(base),
            None => Endpoints {
                token_url: self.token_url.clone(),
                export_url: self.export_url.clone(),
                search_url: self.search_url.clone(),
            },
        }
    }
}

/// Resolved vendor endpoint URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub token_url: String,
    pub export_url: String,
    pub search_url: String,
}

impl Endpoints {
    /// Derives every endpoint from one base URL.
    pub fn from_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            token_url: format!("{base}/oauth2/tokens"),
            export_url: format!("{base}/sccs/v1/events/export"),
            search_url: format!("{base}/v1/event-search"),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            export_url: default_export_url(),
            search_url: default_search_url(),
        }
    }
}

/// Poll schedule and pagination settings
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default)]
    pub mode: RetrievalMode,
    /// Seconds between poll cycles
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// How far before startup the first window begins (seconds)
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_search_clock_skew_secs")]
    pub search_clock_skew_secs: i64,
    /// Timeout applied to every vendor HTTP call (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_period_secs() -> u64 {
    300
}

fn default_lookback_secs() -> u64 {
    3600
}

fn default_batch_size() -> u32 {
    1000
}

fn default_search_clock_skew_secs() -> i64 {
    DEFAULT_CLOCK_SKEW_SECS
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::default(),
            period_secs: default_period_secs(),
            lookback_secs: default_lookback_secs(),
            batch_size: default_batch_size(),
            search_clock_skew_secs: default_search_clock_skew_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Field renaming table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingConfig {
    /// CSV file of `original,canonical` names; identity mapping when absent
    #[serde(default)]
    pub field_map_path: Option<PathBuf>,
}

/// Where flattened events are published
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// JSON lines on stdout
    #[default]
    Stdout,
    /// POST each event as JSON to `url`
    Http { url: String },
}

impl SepbeatConfig {
    /// Replaces the client secret with `SEPBEAT_CLIENT_SECRET` when set.
    pub fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            self.vendor.client_secret = secret;
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.vendor.customer_id.is_empty(), "vendor.customer_id is required");
        ensure!(!self.vendor.domain_id.is_empty(), "vendor.domain_id is required");
        ensure!(!self.vendor.client_id.is_empty(), "vendor.client_id is required");
        ensure!(
            !self.vendor.client_secret.is_empty(),
            "vendor.client_secret is required (or set {})",
            CLIENT_SECRET_ENV
        );
        ensure!(self.poller.period_secs > 0, "poller.period_secs must be positive");
        ensure!(self.poller.batch_size > 0, "poller.batch_size must be positive");
        ensure!(
            (0..=MAX_SEARCH_CLOCK_SKEW_SECS).contains(&self.poller.search_clock_skew_secs),
            "poller.search_clock_skew_secs must be between 0 and {}",
            MAX_SEARCH_CLOCK_SKEW_SECS
        );
        Ok(())
    }
}

/// Parse configuration from TOML text
pub fn parse_config(contents: &str) -> Result<SepbeatConfig> {
    toml::from_str(contents).context("Failed to parse configuration")
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<SepbeatConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    parse_config(&contents)
}
