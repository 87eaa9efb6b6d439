//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` over stub
//! fetchers and exercise every route using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use stormslide::api::{create_app, ApiState};
use stormslide::cache::{CachePolicy, RateLimitedCache};
use stormslide::sources::{
    FetchError, FetchResponse, GridDecoder, Level3Response, MomentFile, SourceFetcher,
};
use stormslide::types::{GridShapeError, MomentGrid};
use stormslide::Aggregator;

struct FixedFetcher<P> {
    name: &'static str,
    outcome: Result<P, FetchError>,
}

#[async_trait]
impl<P: Clone + Send + Sync + 'static> SourceFetcher for FixedFetcher<P> {
    type Payload = P;

    async fn fetch(&self) -> Result<FetchResponse<P>, FetchError> {
        self.outcome.clone().map(FetchResponse::ok)
    }

    fn source_name(&self) -> &str {
        self.name
    }
}

/// Never reached in these tests: Level II always fails.
struct NoGrid;

impl GridDecoder for NoGrid {
    fn decode(&self, _file: &MomentFile) -> Result<MomentGrid, GridShapeError> {
        Err(GridShapeError::Decode("no grid".to_string()))
    }
}

fn policy() -> CachePolicy {
    policy_with_failure_ttl(Duration::from_secs(60))
}

fn policy_with_failure_ttl(failure_ttl: Duration) -> CachePolicy {
    CachePolicy {
        ttl: Duration::from_secs(600),
        failure_ttl,
        fetch_deadline: Duration::from_secs(5),
        rate_limit_floor: 5,
        cooldown: Duration::ZERO,
        rate_limit_retries: 0,
        rate_limit_backoff: Duration::ZERO,
    }
}

fn state(level3: Result<Level3Response, FetchError>) -> ApiState {
    state_with_policy(level3, policy())
}

fn state_with_policy(level3: Result<Level3Response, FetchError>, policy: CachePolicy) -> ApiState {
    let level2: FixedFetcher<MomentFile> = FixedFetcher {
        name: "level2",
        outcome: Err(FetchError::Unavailable("no volume".to_string())),
    };
    let level3 = FixedFetcher {
        name: "level3",
        outcome: level3,
    };
    let aggregator = Aggregator::new(
        Arc::new(RateLimitedCache::new(Arc::new(level2), policy.clone())),
        Arc::new(RateLimitedCache::new(Arc::new(level3), policy)),
        Arc::new(NoGrid),
    );
    ApiState::new(Arc::new(aggregator))
}

fn healthy_response() -> Level3Response {
    Level3Response {
        success: true,
        status_code: Some(200),
        data: json!([
            {"ob": {"tvs": 1, "mda": 5, "dateTimeISO": "2020-05-03T17:01:00-05:00"}, "loc": {"lat": 30.1, "long": -84.2}}
        ]),
        error: None,
    }
}

fn healthy_state() -> ApiState {
    state(Ok(healthy_response()))
}

fn failing_state() -> ApiState {
    state(Err(FetchError::Status {
        status: 503,
        message: "Service Unavailable".to_string(),
    }))
}

async fn get(state: ApiState, uri: &str) -> (StatusCode, Value) {
    let resp = create_app(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// /tornadoes returns the bare array the map frontend reads.
#[tokio::test]
async fn test_tornadoes_returns_bare_array() {
    let (status, body) = get(healthy_state(), "/tornadoes").await;
    assert_eq!(status, StatusCode::OK);

    let items = body.as_array().expect("bare JSON array");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["lat"], 30.1);
    assert_eq!(items[0]["lon"], -84.2);
    assert_eq!(items[0]["shear"], 5.0);
    assert_eq!(items[0]["type"], "TVS");
    assert_eq!(items[0]["source"], "Level III");
    assert_eq!(items[0]["time"], "2020-05-03T17:01:00-05:00");
}

/// /tornadoes reports total failure as `500 {"error": ...}`.
#[tokio::test]
async fn test_tornadoes_failure_is_500() {
    let (status, body) = get(failing_state(), "/tornadoes").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn test_v1_signatures_envelope() {
    let (status, body) = get(healthy_state(), "/api/v1/signatures").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["meta"]["version"], "1");
}

#[tokio::test]
async fn test_v1_signatures_failure_is_503() {
    let (status, body) = get(failing_state(), "/api/v1/signatures").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
}

/// Health never fetches: a fresh app reports both caches empty.
#[tokio::test]
async fn test_v1_health_reports_sources() {
    let (status, body) = get(healthy_state(), "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);

    let data = &body["data"];
    assert_eq!(data["status"], "ok");
    let sources = data["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0]["source"], "level2");
    assert_eq!(sources[0]["state"], "empty");
    assert_eq!(sources[0]["fetch_calls"], 0);
    assert_eq!(sources[1]["source"], "level3");
}

/// After a cycle with a failed Level II fetch, health reports degraded.
#[tokio::test]
async fn test_v1_health_degraded_after_failure() {
    let state = healthy_state();
    let (status, _) = get(state.clone(), "/tornadoes").await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(state, "/api/v1/health").await;
    assert_eq!(body["data"]["status"], "degraded");
    assert_eq!(body["data"]["sources"][0]["state"], "fresh");
    assert!(body["data"]["sources"][0]["cached_error"].is_string());
    assert_eq!(body["data"]["sources"][1]["last_status"], 200);
}

/// A cached failure past its TTL is no longer reported as degraded.
#[tokio::test]
async fn test_v1_health_ok_once_failure_expires() {
    let state = state_with_policy(
        Ok(healthy_response()),
        policy_with_failure_ttl(Duration::from_millis(50)),
    );
    let (status, _) = get(state.clone(), "/tornadoes").await;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(120)).await;

    let (_, body) = get(state, "/api/v1/health").await;
    assert_eq!(body["data"]["sources"][0]["state"], "expired");
    assert!(body["data"]["sources"][0]["cached_error"].is_string());
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_unknown_route_is_404_envelope() {
    let (status, body) = get(healthy_state(), "/api/v1/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
