// ABOUTME: Snapshot handlers for one container: create, list held epochs, destroy by epoch or range.
// ABOUTME: Destroy requests accept exactly one of a single epoch or an inclusive epoch range.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use epochd_core::{DestroyTarget, Epoch, EpochRange, TargetError};
use serde::Deserialize;

use super::{error_response, parse_container_id, snapshot_error_response};
use crate::app_state::SharedState;

/// Request body for destroying snapshots. The range can be given as the
/// `"B-E"` string form or as separate `lo`/`hi` bounds, not both.
#[derive(Debug, Default, Deserialize)]
pub struct DestroyRequest {
    pub epoch: Option<Epoch>,
    pub epcrange: Option<String>,
    pub lo: Option<Epoch>,
    pub hi: Option<Epoch>,
}

impl DestroyRequest {
    pub fn into_target(self) -> Result<DestroyTarget, TargetError> {
        let bounds = match (self.lo, self.hi) {
            (Some(lo), Some(hi)) => Some(EpochRange::new(lo, hi)),
            (None, None) => None,
            (Some(_), None) => return Err(TargetError::MissingBound("hi")),
            (None, Some(_)) => return Err(TargetError::MissingBound("lo")),
        };
        let range = match (self.epcrange, bounds) {
            (Some(text), None) => Some(text.parse::<EpochRange>()?),
            (None, bounds) => bounds,
            (Some(_), Some(_)) => return Err(TargetError::Both),
        };
        DestroyTarget::from_parts(self.epoch, range)
    }
}

/// POST /api/containers/{id}/snapshots - Take a snapshot at a freshly allocated epoch.
pub async fn create_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let container = match parse_container_id(&id) {
        Ok(c) => c,
        Err(resp) => return *resp,
    };

    match state.snapshots.create(container).await {
        Ok(epoch) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "epoch": epoch })),
        )
            .into_response(),
        Err(e) => snapshot_error_response(e),
    }
}

/// GET /api/containers/{id}/snapshots - Held epochs in ascending order.
pub async fn list_snapshots(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let container = match parse_container_id(&id) {
        Ok(c) => c,
        Err(resp) => return *resp,
    };

    match state.snapshots.list(container).await {
        Ok(epochs) => Json(serde_json::json!({ "epochs": epochs })).into_response(),
        Err(e) => snapshot_error_response(e),
    }
}

/// DELETE /api/containers/{id}/snapshots - Destroy one snapshot or every snapshot in a range.
pub async fn destroy_snapshots(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<DestroyRequest>,
) -> impl IntoResponse {
    let container = match parse_container_id(&id) {
        Ok(c) => c,
        Err(resp) => return *resp,
    };
    let target = match req.into_target() {
        Ok(t) => t,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.snapshots.destroy(container, target).await {
        Ok(removed) => Json(serde_json::json!({ "removed": removed })).into_response(),
        Err(e) => snapshot_error_response(e),
    }
}
