//! API route handlers

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use super::envelope::{ApiErrorResponse, ApiResponse, LegacyError};
use crate::aggregator::Aggregator;
use crate::cache::CacheStatus;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub aggregator: Arc<Aggregator>,
    pub started: Instant,
}

impl ApiState {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            aggregator,
            started: Instant::now(),
        }
    }
}

/// `GET /tornadoes`: bare signature array, or `500 {"error": ...}`.
pub async fn get_tornadoes(State(state): State<ApiState>) -> Response {
    match state.aggregator.get_signatures().await {
        Ok(signatures) => Json(signatures).into_response(),
        Err(e) => {
            error!(error = %e, "GET /tornadoes failed");
            LegacyError::internal(e.to_string())
        }
    }
}

/// `GET /api/v1/signatures`
pub async fn get_signatures(State(state): State<ApiState>) -> Response {
    match state.aggregator.get_signatures().await {
        Ok(signatures) => ApiResponse::ok(signatures),
        Err(e) => {
            error!(error = %e, "GET /api/v1/signatures failed");
            ApiErrorResponse::service_unavailable(e.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` unless a source holds a fresh cached failure
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub sources: Vec<CacheStatus>,
}

/// `GET /api/v1/health`: per-source cache state. Never triggers a fetch.
pub async fn get_health(State(state): State<ApiState>) -> Response {
    let sources = state.aggregator.source_status();
    // An expired failure is retried on the next request, so it no longer degrades.
    let degraded = sources
        .iter()
        .any(|s| s.state == "fresh" && s.cached_error.is_some());

    ApiResponse::ok(HealthResponse {
        status: if degraded { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started.elapsed().as_secs(),
        sources,
    })
}

pub async fn not_found() -> Response {
    ApiErrorResponse::not_found("no such endpoint")
}
