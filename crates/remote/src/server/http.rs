//! HTTP cache server
//!
//! | Request | Response |
//! |---|---|
//! | `GET /cache/{hex}` | 200 with the stored bytes, or 404 |
//! | `PUT /cache/{hex}` | 201 when created, 200 when already present or replaced |
//! | `DELETE /cache/{hex}` | 200, or 404 when absent |
//!
//! A key that is not 64 hex characters gets 400.

use super::ServerOptions;
use crate::error::{RemoteError, Result};
use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::get,
};
use kiln_cache::{Fingerprint, LocalStore, PutOutcome};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct AppState {
    store: LocalStore,
    options: Arc<ServerOptions>,
}

impl AppState {
    /// Authorize and parse the key, or produce the error response.
    fn check(&self, headers: &HeaderMap, key: &str) -> std::result::Result<Fingerprint, Response> {
        let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if !self.options.authorizes(header) {
            return Err(StatusCode::UNAUTHORIZED.into_response());
        }
        Fingerprint::from_hex(key).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())
    }
}

/// Router serving `store` with default options.
pub fn router(store: LocalStore) -> Router {
    router_with_options(store, ServerOptions::default())
}

/// Router serving `store`.
pub fn router_with_options(store: LocalStore, options: ServerOptions) -> Router {
    let body_limit = options.max_artifact_bytes;
    Router::new()
        .route(
            "/cache/{fingerprint}",
            get(get_entry).put(put_entry).delete(delete_entry),
        )
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(AppState {
            store,
            options: Arc::new(options),
        })
}

/// Serve `router` on `listener` until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr().ok();
    tracing::info!(addr = ?addr, "HTTP cache server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("HTTP cache server shutting down");
        })
        .await
        .map_err(|e| RemoteError::serve("http", e.to_string()))
}

async fn health() -> &'static str {
    "ok"
}

async fn get_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    let fingerprint = match state.check(&headers, &key) {
        Ok(fp) => fp,
        Err(response) => return response,
    };
    let store = state.store.clone();
    match blocking(move || store.get_bytes(&fingerprint)).await {
        Ok(Some(data)) => {
            tracing::debug!(fingerprint = %fingerprint, size = data.len(), "Served entry");
            (StatusCode::OK, data).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(response) => response,
    }
}

async fn put_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let fingerprint = match state.check(&headers, &key) {
        Ok(fp) => fp,
        Err(response) => return response,
    };
    let store = state.store.clone();
    let size = body.len();
    match blocking(move || store.put_bytes(&fingerprint, &body)).await {
        Ok(outcome) => {
            tracing::debug!(fingerprint = %fingerprint, size, ?outcome, "Stored entry");
            match outcome {
                PutOutcome::Created => StatusCode::CREATED.into_response(),
                PutOutcome::Unchanged | PutOutcome::Replaced => StatusCode::OK.into_response(),
            }
        }
        Err(response) => response,
    }
}

async fn delete_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    let fingerprint = match state.check(&headers, &key) {
        Ok(fp) => fp,
        Err(response) => return response,
    };
    let store = state.store.clone();
    match blocking(move || store.delete_entry(&fingerprint)).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(response) => response,
    }
}

/// Run store I/O off the async workers, mapping failures to 500.
async fn blocking<T, F>(f: F) -> std::result::Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce() -> kiln_cache::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Cache store operation failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cache store task failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}
