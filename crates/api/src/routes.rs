//! Route definitions.

use crate::handlers;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the API router.
pub fn create_router(state: AppState, body_limit_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/healthz", get(handlers::health_check))
        // Collections
        .route(
            "/v1/collections",
            post(handlers::create_collection).get(handlers::list_collections),
        )
        .route(
            "/v1/collections/:name",
            delete(handlers::delete_collection),
        )
        .route("/v1/collections/:name/stats", get(handlers::get_stats))
        .route("/v1/collections/:name/count", get(handlers::count))
        .route("/v1/collections/:name/rebuild", post(handlers::rebuild))
        // Points
        .route(
            "/v1/collections/:name/points",
            post(handlers::insert_points),
        )
        .route(
            "/v1/collections/:name/points/:id",
            get(handlers::get_point).delete(handlers::delete_point),
        )
        .route("/v1/collections/:name/search", post(handlers::search))
        // Middleware
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
