// Request middleware: HMAC verification and access logging

use axum::body::{to_bytes, Body, HttpBody};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::time::Instant;
use tracing::{info, warn};

use super::AppState;
use crate::crypto::{self, HASH_HEADER};

/// Largest request body buffered for signature checks
const MAX_SIGNED_BODY: usize = 16 * 1024 * 1024;

/// Verifies `HashSHA256` over the decompressed request body
///
/// Only enforced when the server has a key and the request carries the
/// header; unsigned requests pass through.
pub async fn verify_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(key) = state.key.as_deref() else {
        return next.run(request).await;
    };
    let Some(signature) = request
        .headers()
        .get(HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
    else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_SIGNED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    if !crypto::verify(&bytes, key, &signature) {
        warn!(
            method = %parts.method,
            path = parts.uri.path(),
            received_hash = %signature,
            "Hash validation failed"
        );
        return (StatusCode::BAD_REQUEST, "hash validation failed").into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Logs method, URI, status, duration and response size of every request
pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let size = response.body().size_hint().exact();
    info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        size = ?size,
        "HTTP request"
    );

    response
}
