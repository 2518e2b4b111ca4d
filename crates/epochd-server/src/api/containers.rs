// ABOUTME: Container lifecycle handlers: list live containers, create one, destroy one.
// ABOUTME: Creating a container provisions its storage, registry actor, and checkpoint task.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use epochd_core::Epoch;
use serde::Serialize;
use ulid::Ulid;

use super::{manager_error_response, parse_container_id, snapshot_error_response};
use crate::app_state::SharedState;

/// Summary of a container for the list endpoint.
#[derive(Debug, Serialize)]
pub struct ContainerSummary {
    pub container_id: String,
    pub held: usize,
    pub high_water: Epoch,
}

/// GET /api/containers - List live containers with their registry size.
pub async fn list_containers(State(state): State<SharedState>) -> impl IntoResponse {
    let mut summaries = Vec::new();
    for container in state.snapshots.containers().await {
        let handle = match state.snapshots.handle(container).await {
            Ok(h) => h,
            // Destroyed between listing and lookup
            Err(_) => continue,
        };
        let registry = handle.read_state().await;
        summaries.push(ContainerSummary {
            container_id: container.to_string(),
            held: registry.len(),
            high_water: registry.high_water,
        });
    }
    Json(summaries)
}

/// POST /api/containers - Create a new, empty container.
pub async fn create_container(State(state): State<SharedState>) -> impl IntoResponse {
    let container = Ulid::new();
    if let Err(e) = state
        .storage
        .create_container(&state.snapshots, container)
        .await
    {
        return manager_error_response(e);
    }
    state.start_checkpointer(container).await;

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "container_id": container.to_string() })),
    )
        .into_response()
}

/// DELETE /api/containers/{id} - Destroy a container and every snapshot it holds.
pub async fn destroy_container(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let container = match parse_container_id(&id) {
        Ok(c) => c,
        Err(resp) => return *resp,
    };
    if !state.snapshots.exists(container).await {
        return snapshot_error_response(epochd_core::SnapshotError::ContainerNotFound(container));
    }

    state.stop_checkpointer(container).await;
    match state
        .storage
        .destroy_container(&state.snapshots, container)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => manager_error_response(e),
    }
}
