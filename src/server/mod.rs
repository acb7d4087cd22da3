pub mod routes;
pub mod ws;

use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

/// REST + WebSocket routes with permissive CORS for the dashboard.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/assets", get(routes::get_assets))
        .route("/api/assets/{symbol}/prices", get(routes::get_prices))
        .route("/api/assets/{symbol}/ingest", axum::routing::post(routes::post_ingest))
        .route(
            "/api/assets/{symbol}/simulations",
            get(routes::get_simulations).post(routes::post_simulation),
        )
        .route("/api/assets/{symbol}/simulations/latest", get(routes::get_latest_simulation))
        .route("/api/counters", get(routes::get_counters))
        .route("/ws", get(ws::ws_handler))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
