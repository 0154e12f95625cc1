//! API module for the certificate authority server

pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub name: String,
    pub provisioner_count: usize,
    pub user_key: bool,
    pub host_key: bool,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    let keys = state.authority.ssh_keys().ok();

    Json(ReadyResponse {
        ready: true,
        name: state.name.clone(),
        provisioner_count: state.authority.provisioner_count(),
        user_key: keys.as_ref().is_some_and(|k| k.user_key.is_some()),
        host_key: keys.as_ref().is_some_and(|k| k.host_key.is_some()),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // SSH endpoints
        .route("/ssh/sign", post(handlers::sign_ssh))
        .route("/ssh/keys", get(handlers::ssh_keys))
        .route("/ssh/config", post(handlers::ssh_config))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
