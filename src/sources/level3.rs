//! Level III vendor fetcher
//!
//! Calls the vendor's `stormcells/closest` endpoint and wraps the body in a
//! [`Level3Response`]. Credentials are supplied from the environment at
//! construction and never logged.

use crate::config::defaults::{LEVEL3_CLIENT_ID_ENV, LEVEL3_CLIENT_SECRET_ENV};
use crate::config::Level3Config;
use crate::sources::{
    error_for_status, FetchError, FetchResponse, RateLimitState, RetryPolicy, SourceFetcher,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Vendor error code for "query matched nothing".
pub const NO_DATA_CODE: &str = "warn_no_data";

/// Client id/secret pair for the vendor API.
#[derive(Clone)]
pub struct VendorCredentials {
    client_id: String,
    client_secret: String,
}

impl VendorCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Read `AERIS_CLIENT_ID` / `AERIS_CLIENT_SECRET`. `None` when either is
    /// unset or blank.
    pub fn from_env() -> Option<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Some(Self::new(
            read(LEVEL3_CLIENT_ID_ENV)?,
            read(LEVEL3_CLIENT_SECRET_ENV)?,
        ))
    }
}

impl fmt::Debug for VendorCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Error object in a vendor body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorError {
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Raw vendor body, as sent.
#[derive(Debug, Deserialize)]
struct VendorBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<VendorError>,
    #[serde(default)]
    response: Value,
}

/// Level III payload handed to the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Level3Response {
    pub success: bool,
    pub status_code: Option<u16>,
    /// The vendor's `response` member, in whatever shape it arrived
    pub data: Value,
    pub error: Option<VendorError>,
}

impl Level3Response {
    /// Wrap a vendor body received with HTTP `status`.
    pub fn from_body(status: u16, body: Value) -> Result<Self, FetchError> {
        let body: VendorBody = serde_json::from_value(body)
            .map_err(|e| FetchError::Decode(format!("vendor body: {e}")))?;
        Ok(Self {
            success: body.success,
            status_code: Some(status),
            data: body.response,
            error: body.error,
        })
    }

    /// The vendor answered but found nothing.
    pub fn is_no_data(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.code == NO_DATA_CODE)
    }

    /// Genuine vendor-side failure carried in a 2xx body.
    fn vendor_failure(&self) -> Option<FetchError> {
        if self.success || self.is_no_data() {
            return None;
        }
        let detail = match &self.error {
            Some(e) => format!(
                "{}: {}",
                e.code,
                e.description.as_deref().unwrap_or("no description")
            ),
            None => "success=false without error".to_string(),
        };
        Some(FetchError::Unavailable(format!("vendor error {detail}")))
    }
}

/// Fetches storm cells near one location from the vendor API.
pub struct VendorFetcher {
    http: reqwest::Client,
    endpoint: String,
    location: String,
    query: String,
    limit: u32,
    credentials: Option<VendorCredentials>,
    retry: RetryPolicy,
}

impl VendorFetcher {
    pub fn new(
        http: reqwest::Client,
        cfg: &Level3Config,
        credentials: Option<VendorCredentials>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            location: cfg.location.clone(),
            query: cfg.query.clone(),
            limit: cfg.limit,
            credentials,
            retry,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    async fn request(
        &self,
        creds: &VendorCredentials,
    ) -> Result<(u16, Value, Option<RateLimitState>), FetchError> {
        let limit = self.limit.to_string();
        let response = self
            .http
            .get(format!("{}/stormcells/closest", self.endpoint))
            .query(&[
                ("p", self.location.as_str()),
                ("query", self.query.as_str()),
                ("limit", limit.as_str()),
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
            ])
            .send()
            .await?;

        let response = error_for_status(response)?;
        let status = response.status().as_u16();
        let rate_limit = RateLimitState::from_headers(response.headers());
        let body = response.json::<Value>().await?;
        Ok((status, body, rate_limit))
    }
}

#[async_trait]
impl SourceFetcher for VendorFetcher {
    type Payload = Level3Response;

    async fn fetch(&self) -> Result<FetchResponse<Level3Response>, FetchError> {
        let creds = self.credentials.as_ref().ok_or_else(|| {
            FetchError::Unavailable(format!(
                "vendor credentials not configured ({LEVEL3_CLIENT_ID_ENV} / {LEVEL3_CLIENT_SECRET_ENV})"
            ))
        })?;

        let (status, body, rate_limit) =
            self.retry.run("level3", |_| self.request(creds)).await?;
        let payload = Level3Response::from_body(status, body)?;

        if let Some(err) = payload.vendor_failure() {
            return Err(err);
        }
        if payload.is_no_data() {
            debug!(location = %self.location, "Vendor reported no storm cells");
        }

        let response = FetchResponse {
            payload,
            status,
            rate_limit: None,
        };
        Ok(match rate_limit {
            Some(state) => response.with_rate_limit(state),
            None => response,
        })
    }

    fn source_name(&self) -> &str {
        "level3"
    }
}
