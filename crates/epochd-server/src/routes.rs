// ABOUTME: Route definitions for the epochd HTTP API.
// ABOUTME: Assembles container, snapshot, GC, and streaming routes into one Axum Router.

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::SharedState;
use crate::auth::AuthLayer;

/// Build the complete router. With `auth_token` set, every /api route requires it.
pub fn create_router(state: SharedState, auth_token: Option<String>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route(
            "/api/containers",
            get(api::containers::list_containers).post(api::containers::create_container),
        )
        .route(
            "/api/containers/{id}",
            delete(api::containers::destroy_container),
        )
        .route(
            "/api/containers/{id}/snapshots",
            get(api::snapshots::list_snapshots)
                .post(api::snapshots::create_snapshot)
                .delete(api::snapshots::destroy_snapshots),
        )
        .route("/api/containers/{id}/held", get(api::gc::held_epochs))
        .route("/api/containers/{id}/held/{epoch}", get(api::gc::epoch_held))
        .route("/api/containers/{id}/gc/plan", post(api::gc::plan))
        .route(
            "/api/containers/{id}/events/stream",
            get(api::stream::event_stream),
        )
        .with_state(state);

    let router = match auth_token {
        Some(token) => router.layer(AuthLayer::new(token)),
        None => router,
    };
    router.layer(TraceLayer::new_for_http())
}

/// Health check handler. Returns 200 OK with a simple JSON body.
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
