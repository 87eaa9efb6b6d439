//! REST API module using Axum
//!
//! - `GET /tornadoes`: merged signatures as a bare JSON array (map frontend)
//! - `GET /api/v1/signatures`: merged signatures in the response envelope
//! - `GET /api/v1/health`: per-source cache and rate-limit state

pub mod envelope;
pub mod handlers;

pub use handlers::ApiState;

use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Comma-separated list of allowed CORS origins.
pub const CORS_ORIGINS_ENV: &str = "STORMSLIDE_CORS_ORIGINS";

/// Read-only API, so any origin may read it unless origins are pinned via
/// `STORMSLIDE_CORS_ORIGINS`.
fn build_cors_layer() -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    match std::env::var(CORS_ORIGINS_ENV) {
        Ok(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            cors.allow_origin(allowed)
        }
        Err(_) => cors.allow_origin(Any),
    }
}

fn api_routes() -> Router<ApiState> {
    Router::new()
        .route("/signatures", get(handlers::get_signatures))
        .route("/health", get(handlers::get_health))
}

/// Create the complete application router.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/tornadoes", get(handlers::get_tornadoes))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
