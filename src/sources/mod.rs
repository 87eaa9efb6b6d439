//! Upstream source fetchers
//!
//! A [`SourceFetcher`] produces one raw payload per call and reports the
//! HTTP-equivalent status plus any rate-limit metadata the upstream sent.
//! Caching, single-flight and rate-limit cooperation live one layer up in
//! [`crate::cache::RateLimitedCache`].
//!
//! - [`level2::ObjectStoreFetcher`]: newest Level II moment file for a site
//! - [`level3::VendorFetcher`]: storm-cell feed from the vendor REST API
//! - [`grid_decoder`]: moment file → [`MomentGrid`](crate::types::MomentGrid)
//! - [`archive2`]: NEXRAD Archive II volume decoding

pub mod archive2;
pub mod grid_decoder;
pub mod level2;
pub mod level3;
pub mod rate_limit;
pub mod retry;

pub use archive2::Archive2Decoder;
pub use grid_decoder::{GridDecoder, JsonGridDecoder, VolumeDecoder};
pub use level2::{MomentFile, ObjectStoreFetcher};
pub use level3::{Level3Response, VendorCredentials, VendorError, VendorFetcher};
pub use rate_limit::RateLimitState;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Upstream fetch failures.
///
/// `Clone` so a failure can be cached and handed to every waiter of a
/// single-flight fill.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("rate limit exceeded (429)")]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("upstream call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("payload decode error: {0}")]
    Decode(String),

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// HTTP-equivalent status of the failure, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::RateLimited { .. } => Some(429),
            FetchError::Timeout(_) => Some(504),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return FetchError::Status {
                status: status.as_u16(),
                message: e.to_string(),
            };
        }
        if e.is_decode() {
            return FetchError::Decode(e.to_string());
        }
        FetchError::Transport(e.to_string())
    }
}

/// Map a non-success HTTP response onto a `FetchError`.
///
/// 429 becomes `RateLimited` (with the vendor's reset time when present);
/// any other non-2xx becomes `Status`.
pub(crate) fn error_for_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let reset_at = RateLimitState::from_headers(response.headers()).and_then(|s| s.reset_at);
        return Err(FetchError::RateLimited { reset_at });
    }
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string(),
        });
    }
    Ok(response)
}

/// One successful upstream answer.
#[derive(Debug, Clone)]
pub struct FetchResponse<P> {
    pub payload: P,
    /// HTTP-equivalent status (200 for a local/object-store hit)
    pub status: u16,
    /// Rate-limit headers from the response, if the upstream sends them
    pub rate_limit: Option<RateLimitState>,
}

impl<P> FetchResponse<P> {
    pub fn ok(payload: P) -> Self {
        Self {
            payload,
            status: 200,
            rate_limit: None,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitState) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }
}

/// Trait abstracting where a source's raw payload comes from.
///
/// Implementations own transport concerns (URLs, credentials, transport
/// retry). The cache calls [`fetch`](SourceFetcher::fetch) only on a miss.
#[async_trait]
pub trait SourceFetcher: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;

    async fn fetch(&self) -> Result<FetchResponse<Self::Payload>, FetchError>;

    /// Human-readable name for logging (e.g. "level2", "level3").
    fn source_name(&self) -> &str;
}
