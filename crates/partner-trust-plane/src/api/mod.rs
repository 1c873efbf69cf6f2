//! API module for the trust plane server

pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::registry::DomainStats;
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub max_chain_depth: usize,
    pub certificate_count: usize,
    pub domains: BTreeMap<String, DomainStats>,
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
    let domains = state
        .registry
        .stats()
        .into_iter()
        .map(|(domain, stats)| (domain.to_string(), stats))
        .collect();

    Json(ReadyResponse {
        ready: true,
        name: state.config.name.clone(),
        max_chain_depth: state.registry.validator().max_chain_depth(),
        certificate_count: state.registry.len(),
        domains,
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
        // Certificate endpoints
        .route("/v1/certificates/ca", post(handlers::upload_ca_certificate))
        .route("/v1/certificates/partner", post(handlers::upload_partner_certificate))
        .route("/v1/certificates/lookup", post(handlers::lookup_certificate))
        .route("/v1/certificates/revoke", post(handlers::revoke_certificate))
        .route(
            "/v1/partners/{partner_id}/certificate",
            get(handlers::get_partner_certificate),
        )
        // API-key request endpoints
        .route(
            "/v1/partners/{partner_id}/apikey-requests",
            post(handlers::submit_request).get(handlers::list_requests),
        )
        .route(
            "/v1/partners/{partner_id}/apikey-requests/{id}/key",
            get(handlers::download_key),
        )
        .route("/v1/apikey-requests/{id}", get(handlers::get_request))
        .route("/v1/apikey-requests/{id}/approve", post(handlers::approve_request))
        .route("/v1/apikey-requests/{id}/reject", post(handlers::reject_request))
        .route("/v1/apikey-requests/{id}/revoke", post(handlers::revoke_request))
        .route("/v1/apikey-requests/{id}/key", post(handlers::generate_key))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
