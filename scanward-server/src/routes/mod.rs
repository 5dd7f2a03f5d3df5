use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{events, health, scan};
use crate::infra::{app_state::AppState, middleware};

/// Scan endpoints without any middleware.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/start_scan", post(scan::start_scan))
        .route("/scan_status/{id}", get(scan::scan_status))
        .route("/recent_scans", get(scan::recent_scans))
        .route("/scan_events", get(events::scan_events))
        .route("/health", get(health::health))
}

/// The full application: routes, tracing, CORS and security headers.
pub fn create_app(state: AppState) -> Router {
    let config = state.config().clone();

    let app = create_api_router()
        .layer(TraceLayer::new_for_http())
        .layer(middleware::cors_layer(&config.cors));

    middleware::harden(app, &config.security).with_state(state)
}
