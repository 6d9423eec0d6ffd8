use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use ray_core::incident::IncidentPolicy;
use tower_http::trace::TraceLayer;

use crate::routes;

/// Application state shared across handlers.
pub struct AppState {
    pub policy: IncidentPolicy,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(policy: IncidentPolicy) -> Self {
        Self {
            policy,
            start_time: Instant::now(),
        }
    }
}

/// Build the router with webhook and health routes.
pub fn router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    Router::new()
        .merge(routes::webhook_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(TraceLayer::new_for_http())
}
