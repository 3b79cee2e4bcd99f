//! OAuth2 client-credentials exchange against the vendor token endpoint.
//!
//! The vendor issues short-lived bearer tokens in exchange for a client
//! id/secret pair. A [`TokenManager`] holds at most one [`Credential`] in
//! memory; it is overwritten on every successful [`TokenManager::acquire`]
//! and never persisted.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};


/// Refresh the held token when it expires within this many seconds.
const REFRESH_THRESHOLD_SECS: i64 = 90;

pub const DOMAIN_HEADER: &str = "x-epmp-domain-id";
pub const CUSTOMER_HEADER: &str = "x-epmp-customer-id";

/// Errors from the credential exchange.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed token response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to encode token request: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),
}

/// Customer and domain identifiers sent with every vendor request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tenant {
    pub customer_id: String,
    pub domain_id: String,
}

/// A bearer token obtained from the token endpoint.
#[derive(Clone)]
pub struct Credential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

impl Credential {
    /// True when the token is already expired or will be within `window`.
    pub fn expires_within(&self, window: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now() + window,
            None => false,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    scope: &'a str,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default, rename = "type")]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Acquires and holds the bearer credential for vendor API calls.
pub struct TokenManager {
    http_client: reqwest::Client,
    token_url: String,
    tenant: Tenant,
    client_id: String,
    client_secret: String,
    credential: Option<Credential>,
}

impl TokenManager {
    pub fn new(
        http_client: reqwest::Client,
        token_url: String,
        tenant: Tenant,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http_client,
            token_url,
            tenant,
            client_id,
            client_secret,
            credential: None,
        }
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    /// The credential from the last successful exchange, if any.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Returns true if no token is held or the held one is about to expire.
    pub fn needs_refresh(&self) -> bool {
        match &self.credential {
            Some(credential) => credential.expires_within(Duration::seconds(REFRESH_THRESHOLD_SECS)),
            None => true,
        }
    }

    /// Returns the held token, exchanging for a new one first if it is
    /// missing or about to expire.
    pub async fn fresh_token(&mut self) -> Result<String, AuthError> {
        if !self.needs_refresh() {
            if let Some(credential) = &self.credential {
                return Ok(credential.token.clone());
            }
        }
        Ok(self.acquire().await?.token.clone())
    }

    /// Exchanges the client id/secret for a fresh bearer token.
    ///
    /// On failure the previously held credential is left in place, but the
    /// caller must treat the current cycle as unauthenticated.
    pub async fn acquire(&mut self) -> Result<&Credential, AuthError> {
        let form = serde_urlencoded::to_string(TokenRequest {
            grant_type: "client_credentials",
            scope: "domain",
        })?;

        debug!(token_url = %self.token_url, "Requesting access token");

        let response = self
            .http_client
            .post(&self.token_url)
            .header("Authorization", format!("Basic {}", self.basic_auth_value()))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .header(DOMAIN_HEADER, &self.tenant.domain_id)
            .header(CUSTOMER_HEADER, &self.tenant.customer_id)
            .body(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token_response: TokenResponse = serde_json::from_str(&body)?;
        let expires_at = token_response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));

        info!(
            scope = token_response.scope.as_deref().unwrap_or(""),
            token_type = token_response.token_type.as_deref().unwrap_or(""),
            expires_in = token_response.expires_in,
            "Acquired access token"
        );

        Ok(self.credential.insert(Credential {
            token: token_response.access_token,
            expires_at,
            scope: token_response.scope,
        }))
    }

    /// `base64(client_id ":" client_secret)` for the Basic auth header.
    fn basic_auth_value(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret))
    }
}
