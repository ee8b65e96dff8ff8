//! pbxwatch server library logic.

pub mod api;
pub mod api_actions;
pub mod api_ws;
pub mod background;
pub mod config;
pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use pbxwatch_monitor::{Monitor, OperatorCommands};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live agent, call and queue state.
    pub monitor: Arc<Monitor>,
    /// Hangup and pause actions.
    pub commands: OperatorCommands,
    /// Interval between liveness pings on observer sockets.
    pub keepalive: Duration,
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let tenant_routes = Router::new()
        .route("/api/actions/hangup", post(api_actions::hangup_handler))
        .route("/api/actions/pause", post(api_actions::pause_handler))
        .layer(axum::middleware::from_fn(middleware::tenant_middleware));

    Router::new()
        .route("/health", get(api::health))
        .route("/ws/monitor", get(api_ws::monitor_ws_handler))
        .merge(tenant_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
