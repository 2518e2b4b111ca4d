// ABOUTME: Read-only garbage-collection endpoints backed by the GC gate.
// ABOUTME: Exposes the held-epoch set and plans which object versions can be reclaimed.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use epochd_core::{Epoch, HeldEpochs};
use serde::Deserialize;

use super::{parse_container_id, snapshot_error_response};
use crate::app_state::SharedState;

/// Request body for planning reclamation of one object's versions.
#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    /// Epochs at which the object was written, in any order.
    pub versions: Vec<Epoch>,
}

/// GET /api/containers/{id}/held - The held epochs the collector must respect.
pub async fn held_epochs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let container = match parse_container_id(&id) {
        Ok(c) => c,
        Err(resp) => return *resp,
    };

    match state.snapshots.query_held(container).await {
        Ok(held) => Json(serde_json::json!({ "epochs": held })).into_response(),
        Err(e) => snapshot_error_response(e),
    }
}

/// GET /api/containers/{id}/held/{epoch} - Whether a single epoch is held.
pub async fn epoch_held(
    State(state): State<SharedState>,
    Path((id, epoch)): Path<(String, u64)>,
) -> impl IntoResponse {
    let container = match parse_container_id(&id) {
        Ok(c) => c,
        Err(resp) => return *resp,
    };
    let epoch = Epoch(epoch);

    match state.gc.is_held(container, epoch).await {
        Ok(held) => Json(serde_json::json!({ "epoch": epoch, "held": held })).into_response(),
        Err(e) => snapshot_error_response(e),
    }
}

/// POST /api/containers/{id}/gc/plan - Split versions into reclaimable and retained.
pub async fn plan(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<PlanRequest>,
) -> impl IntoResponse {
    let container = match parse_container_id(&id) {
        Ok(c) => c,
        Err(resp) => return *resp,
    };

    match state.gc.plan(container, &req.versions).await {
        Ok(plan) => Json(plan).into_response(),
        Err(e) => snapshot_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{app_with_container, send};
    use serde_json::json;

    #[tokio::test]
    async fn plan_keeps_versions_visible_at_held_epochs() {
        let (app, _state, id, _dir) = app_with_container().await;
        let snaps = format!("/api/containers/{}/snapshots", id);

        // Counter allocator: epochs 1, 2, 3
        for _ in 0..3 {
            send(&app, "POST", &snaps, None).await;
        }
        send(&app, "DELETE", &snaps, Some(json!({ "epoch": 2 }))).await;

        let (status, json) = send(&app, "GET", &format!("/api/containers/{}/held", id), None).await;
        assert_eq!(status, 200);
        assert_eq!(json["epochs"], json!([1, 3]));

        // Versions written at 0, 2, 4, 6: the one at 0 is what epoch 1 sees, the one
        // at 2 is what epoch 3 sees, and 6 is the newest.
        let (status, json) = send(
            &app,
            "POST",
            &format!("/api/containers/{}/gc/plan", id),
            Some(json!({ "versions": [6, 0, 4, 2] })),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(json["reclaimable"], json!([4]));
        assert_eq!(json["retained"], json!([0, 2, 6]));
    }

    #[tokio::test]
    async fn single_epoch_lookup() {
        let (app, _state, id, _dir) = app_with_container().await;
        send(&app, "POST", &format!("/api/containers/{}/snapshots", id), None).await;

        let (status, json) = send(&app, "GET", &format!("/api/containers/{}/held/1", id), None).await;
        assert_eq!(status, 200);
        assert_eq!(json["held"], true);

        let (_, json) = send(&app, "GET", &format!("/api/containers/{}/held/9", id), None).await;
        assert_eq!(json["held"], false);
    }

    #[tokio::test]
    async fn unknown_container_is_404() {
        let (app, _state, _id, _dir) = app_with_container().await;
        let ghost = ulid::Ulid::new();
        let (status, _) = send(&app, "GET", &format!("/api/containers/{}/held", ghost), None).await;
        assert_eq!(status, 404);
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/containers/{}/gc/plan", ghost),
            Some(json!({ "versions": [1] })),
        )
        .await;
        assert_eq!(status, 404);
    }
}
