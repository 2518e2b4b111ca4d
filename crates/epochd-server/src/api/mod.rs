// ABOUTME: API module containing the HTTP handlers for the epochd REST API.
// ABOUTME: Shared helpers map snapshot errors onto status codes with a JSON error body.

pub mod containers;
pub mod gc;
pub mod snapshots;
pub mod stream;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use epochd_core::SnapshotError;
use epochd_store::ManagerError;
use ulid::Ulid;

/// JSON error body: `{"error": "..."}`.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// Status code a snapshot error is reported with.
pub fn snapshot_status(err: &SnapshotError) -> StatusCode {
    match err {
        SnapshotError::ContainerNotFound(_) | SnapshotError::NotFound(_) => StatusCode::NOT_FOUND,
        SnapshotError::Range(_) => StatusCode::BAD_REQUEST,
        SnapshotError::ContainerExists(_) => StatusCode::CONFLICT,
        SnapshotError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        SnapshotError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
        SnapshotError::Allocation(_)
        | SnapshotError::CreateFailed { .. }
        | SnapshotError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn snapshot_error_response(err: SnapshotError) -> Response {
    let status = snapshot_status(&err);
    if status.is_server_error() {
        tracing::error!("snapshot operation failed: {}", err);
    }
    error_response(status, err.to_string())
}

pub fn manager_error_response(err: ManagerError) -> Response {
    match err {
        ManagerError::Snapshot(e) => snapshot_error_response(e),
        other => {
            tracing::error!("storage operation failed: {}", other);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// Parse a container ULID from a path segment, returning a 400 response on failure.
pub fn parse_container_id(id: &str) -> Result<Ulid, Box<Response>> {
    id.parse::<Ulid>()
        .map_err(|_| Box::new(error_response(StatusCode::BAD_REQUEST, "invalid container id")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use epochd_core::{CounterAllocator, SnapshotManager};
    use epochd_store::StorageManager;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::app_state::{AppState, SharedState};
    use crate::routes::create_router;

    /// State backed by a fresh temp home. The TempDir must outlive the state.
    pub fn test_state() -> (SharedState, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::new(dir.path().to_path_buf()).unwrap();
        let snapshots = SnapshotManager::new(Arc::new(CounterAllocator::new()));
        (Arc::new(AppState::new(storage, snapshots)), dir)
    }

    pub async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (u16, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status().as_u16();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn app_with_container() -> (Router, SharedState, String, TempDir) {
        let (state, dir) = test_state();
        let app = create_router(state.clone(), None);
        let (status, json) = send(&app, "POST", "/api/containers", None).await;
        assert_eq!(status, 201);
        let id = json["container_id"].as_str().unwrap().to_string();
        (app, state, id, dir)
    }
}
