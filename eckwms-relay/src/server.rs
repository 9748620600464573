//! Axum router setup.

use crate::auth::{admin_middleware, auth_middleware};
use crate::config::RelayConfig;
use crate::handlers::{admin, instances, scans};
use crate::rate_limit::RateLimiter;
use crate::storage::RelayStorage;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub storage: RelayStorage,
    pub config: Arc<RelayConfig>,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(storage: RelayStorage, config: RelayConfig) -> Self {
        Self {
            storage,
            limiter: RateLimiter::new(config.rate_limit_per_minute),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;

    // Instance-authenticated routes
    let authenticated = Router::new()
        .route("/api/v1/instances/heartbeat", post(instances::heartbeat))
        .route("/api/v1/instances/me", get(instances::me))
        .route("/api/v1/scans", post(scans::submit))
        .route("/api/v1/scans/pull", post(scans::pull))
        .route("/api/v1/scans/confirm", post(scans::confirm))
        .route("/api/v1/scans/status", get(scans::status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/api/v1/admin/instances/{id}", delete(admin::delete_instance))
        .route("/api/v1/admin/instances/{id}/tier", post(admin::set_tier))
        .route(
            "/api/v1/admin/instances/{id}/rotate-key",
            post(admin::rotate_key),
        )
        .route("/api/v1/admin/instances/{id}/purge", post(admin::purge))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_middleware,
        ));

    // Unauthenticated routes
    let public = Router::new()
        .route("/api/v1/instances/register", post(instances::register))
        .route("/health", get(health));

    Router::new()
        .merge(authenticated)
        .merge(admin_routes)
        .merge(public)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
