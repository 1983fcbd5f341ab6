mod signaling;
mod status;

use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Signaling
        .route("/offer", post(signaling::offer))
        .route("/renegotiate/{peer_id}", get(signaling::renegotiate))
        .route("/answer/{peer_id}", post(signaling::answer))
        // Introspection
        .route("/ice-servers", get(status::ice_servers))
        .route("/peers", get(status::peers))
        .route("/registry", get(status::registry))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
