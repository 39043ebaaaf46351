use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Widget control
        .route("/widget/open", post(handlers::open_widget))
        .route("/widget/close", post(handlers::close_widget))
        .route("/widget/toggle", post(handlers::toggle_widget))
        .route("/widget/mute", post(handlers::set_muted))
        // Widget queries
        .route("/widget/status", get(handlers::widget_status))
        // The widget is embedded in the marketing site, served from another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
