// ABOUTME: SSE handler streaming a container's registry events as they are applied.
// ABOUTME: Subscribes to the registry broadcast and names each SSE event after its payload kind.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use epochd_core::RegistryEvent;
use futures::stream::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::{parse_container_id, snapshot_error_response};
use crate::app_state::SharedState;

/// Convert a broadcast receiver into an SSE-compatible stream. Lagged gaps are skipped.
fn event_stream_from_receiver(
    rx: broadcast::Receiver<RegistryEvent>,
) -> impl Stream<Item = Result<SseEvent, axum::Error>> {
    BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => {
                let data = serde_json::to_string(&event).ok()?;
                Some(Ok(SseEvent::default()
                    .id(event.event_id.to_string())
                    .event(event.payload.kind())
                    .data(data)))
            }
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                tracing::warn!("sse subscriber lagged, skipped {} registry events", n);
                None
            }
        }
    })
}

/// GET /api/containers/{id}/events/stream - SSE endpoint for registry events.
pub async fn event_stream(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let container = match parse_container_id(&id) {
        Ok(c) => c,
        Err(resp) => return *resp,
    };

    match state.snapshots.subscribe(container).await {
        Ok(rx) => Sse::new(event_stream_from_receiver(rx))
            .keep_alive(KeepAlive::default())
            .into_response(),
        Err(e) => snapshot_error_response(e),
    }
}
