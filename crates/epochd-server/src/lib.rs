// ABOUTME: HTTP server for epochd, exposing the snapshot registry over a REST API with SSE streaming.
// ABOUTME: Uses Axum with shared manager state; each container registry is served by its own actor.

pub mod api;
pub mod app_state;
pub mod auth;
pub mod checkpointer;
pub mod config;
pub mod routes;

pub use app_state::{AppState, SharedState};
pub use config::{AllocatorKind, ConfigError, EpochdConfig};
pub use routes::create_router;
