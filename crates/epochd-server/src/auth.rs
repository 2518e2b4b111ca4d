// ABOUTME: Bearer token authentication middleware for the epochd API.
// ABOUTME: Guards /api routes with a shared token while leaving /health open for health checks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use tower::{Layer, Service};

/// Tower layer that requires `Authorization: Bearer <token>` on API routes.
#[derive(Clone)]
pub struct AuthLayer {
    expected: Arc<str>,
}

impl AuthLayer {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self {
            expected: Arc::from(format!("Bearer {}", token.as_ref())),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            expected: Arc::clone(&self.expected),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    expected: Arc<str>,
}

fn is_protected(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let authorized = !is_protected(req.uri().path())
            || req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == &*self.expected);

        if !authorized {
            tracing::debug!("rejected unauthenticated request to {}", req.uri().path());
            return Box::pin(async {
                Ok((
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({ "error": "unauthorized" })),
                )
                    .into_response())
            });
        }

        // Swap in a fresh clone so the service that was polled ready handles this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}
