use crate::auth::{self, Authenticator};
use crate::config::Config;
use crate::rate_limit::{Principal, RateLimiter, filter::admission_control};
use axum::{
    Extension, Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Json},
    routing::get,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

/// HTTP server state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub limiter: Arc<RateLimiter>,
}

/// Assemble the application: service endpoints plus the catalog API under
/// `/api/v1`, behind authentication and then admission control.
pub fn build_app(state: AppState, authenticator: Arc<dyn Authenticator>, api: Router) -> Router {
    let limiter = state.limiter.clone();

    Router::new()
        // Root
        .route("/", get(root_handler))
        // Health check
        .route("/health", get(health_handler))
        // Metrics (Prometheus)
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        // Catalog API
        .nest("/api/v1", api)
        // Middleware: the last layer added runs first
        .layer(from_fn_with_state(limiter, admission_control))
        .layer(from_fn_with_state(authenticator, auth::authenticate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Endpoints served under `/api/v1` by this binary. The catalog resources
/// are mounted here by the application that embeds the gateway.
pub fn api_routes() -> Router {
    Router::new().route("/whoami", get(whoami_handler))
}

/// GET /
pub async fn root_handler() -> Json<Value> {
    Json(json!({
        "service": "turnstile",
        "version": crate::VERSION,
    }))
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let rate_limit = &state.config.rate_limit;
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "rate_limit": {
            "enabled": rate_limit.enabled,
            "requests_per_minute": rate_limit.requests_per_minute,
            "buckets": state.limiter.store().len(),
        },
    }))
}

/// GET /metrics (Prometheus format)
pub async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    crate::metrics::METRICS.render().map_err(|e| {
        error!("Failed to render metrics: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

/// GET /api/v1/whoami
pub async fn whoami_handler(principal: Option<Extension<Principal>>) -> impl IntoResponse {
    let user = principal.as_ref().and_then(|Extension(p)| p.name());
    Json(json!({
        "authenticated": user.is_some(),
        "user": user,
    }))
}
