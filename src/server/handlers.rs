// HTTP handlers for the collector API
//
// JSON endpoints: /updates/ (batch), /update and /value (single sample)
// Path endpoints: /update/{type}/{name}/{value} and /value/{type}/{name}
// Misc: / (HTML listing) and /ping (database liveness)

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use std::fmt::Write;
use std::net::SocketAddr;
use tracing::{debug, error, info};

use super::AppState;
use crate::audit::client_ip;
use crate::crypto::{self, HASH_HEADER};
use crate::model::{MetricKind, MetricSample};
use crate::service::ServiceError;

/// Rejects requests whose Content-Type is not JSON
fn require_json(headers: &HeaderMap) -> Result<(), Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/json") {
        Ok(())
    } else {
        info!(content_type, "Invalid content type");
        Err((StatusCode::BAD_REQUEST, "content type must be application/json").into_response())
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        info!(error = %e, "Failed to decode JSON");
        (StatusCode::BAD_REQUEST, format!("invalid JSON format: {e}")).into_response()
    })
}

fn source_ip(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> String {
    client_ip(headers, peer.map(|ConnectInfo(addr)| addr))
}

fn error_response(err: ServiceError) -> Response {
    match err {
        ServiceError::Validation(message) => {
            info!(error = %message, "Rejected invalid metrics");
            (StatusCode::BAD_REQUEST, message).into_response()
        }
        ServiceError::Internal(e) => {
            error!(error = %e, "Failed to store metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to store metrics").into_response()
        }
    }
}

/// JSON response, signed with `HashSHA256` when a key is configured
fn signed_json<T: Serialize>(key: Option<&str>, value: &T) -> Response {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "Failed to encode response JSON");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode response").into_response();
        }
    };

    let signature = key
        .filter(|_| !body.is_empty())
        .and_then(|key| HeaderValue::from_str(&crypto::sign(&body, key)).ok());

    let mut response = (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response();

    if let Some(signature) = signature {
        response.headers_mut().insert(HASH_HEADER, signature);
    }
    response
}

/// POST /updates/ - commits a batch of samples all-or-nothing
pub async fn update_batch(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = require_json(&headers) {
        return response;
    }
    let samples: Vec<MetricSample> = match decode(&body) {
        Ok(samples) => samples,
        Err(response) => return response,
    };

    let ip = source_ip(&headers, peer);
    match state.service.update_batch(&samples, &ip).await {
        Ok(updated) => signed_json(state.key.as_deref(), &json!({ "updated": updated })),
        Err(e) => error_response(e),
    }
}

/// POST /update - stores one sample and echoes it back
pub async fn update_json(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = require_json(&headers) {
        return response;
    }
    let sample: MetricSample = match decode(&body) {
        Ok(sample) => sample,
        Err(response) => return response,
    };

    let ip = source_ip(&headers, peer);
    if let Err(e) = state.service.update_sample(&sample, &ip).await {
        return error_response(e);
    }

    info!(id = %sample.id, kind = %sample.kind, "Metric saved");
    signed_json(state.key.as_deref(), &sample)
}

/// Lookup key of a POST /value request
#[derive(serde::Deserialize)]
struct ValueRequest {
    id: String,
    #[serde(rename = "type")]
    kind: MetricKind,
}

/// POST /value - returns the stored sample for `{id, type}`
pub async fn value_json(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(response) = require_json(&headers) {
        return response;
    }
    let request: ValueRequest = match decode(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if request.id.is_empty() {
        return (StatusCode::BAD_REQUEST, "metric id is required").into_response();
    }

    let found = match request.kind {
        MetricKind::Gauge => state
            .store
            .get_gauge(&request.id)
            .await
            .map(|v| v.map(|value| MetricSample::gauge(request.id.clone(), value))),
        MetricKind::Counter => state
            .store
            .get_counter(&request.id)
            .await
            .map(|v| v.map(|delta| MetricSample::counter(request.id.clone(), delta))),
    };

    match found {
        Ok(Some(sample)) => signed_json(state.key.as_deref(), &sample),
        Ok(None) => (StatusCode::NOT_FOUND, "metric not found").into_response(),
        Err(e) => error_response(e.into()),
    }
}

/// POST /update/{type}/{name}/{value}
pub async fn update_path(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Response {
    let ip = source_ip(&headers, peer);
    match state.service.update_raw(&kind, &name, &value, &ip).await {
        Ok(()) => {
            debug!(%kind, %name, %value, "Metric updated");
            StatusCode::OK.into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /value/{type}/{name} - plain-text value
pub async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    let Ok(kind) = kind.parse::<MetricKind>() else {
        return (StatusCode::NOT_FOUND, "unsupported metric type").into_response();
    };

    let text = match kind {
        MetricKind::Gauge => state.store.get_gauge(&name).await.map(|v| v.map(|v| v.to_string())),
        MetricKind::Counter => state.store.get_counter(&name).await.map(|v| v.map(|v| v.to_string())),
    };

    match text {
        Ok(Some(text)) => ([(header::CONTENT_TYPE, "text/plain")], text).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "metric not found").into_response(),
        Err(e) => error_response(e.into()),
    }
}

/// GET / - HTML listing of every metric, sorted by name
pub async fn list_metrics(State(state): State<AppState>) -> Response {
    let (gauges, counters) = match (
        state.store.get_all_gauges().await,
        state.store.get_all_counters().await,
    ) {
        (Ok(gauges), Ok(counters)) => (gauges, counters),
        (Err(e), _) | (_, Err(e)) => return error_response(e.into()),
    };

    let mut gauges: Vec<_> = gauges.into_iter().collect();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    let mut counters: Vec<_> = counters.into_iter().collect();
    counters.sort_by(|a, b| a.0.cmp(&b.0));

    let mut page = String::from(
        "<html><head><title>Metrics</title></head><body><h1>All Metrics</h1><ul>",
    );
    for (name, value) in &gauges {
        let _ = write!(page, "<li>gauge {} = {:.6}</li>", escape_html(name), value);
    }
    for (name, value) in &counters {
        let _ = write!(page, "<li>counter {} = {}</li>", escape_html(name), value);
    }
    page.push_str("</ul></body></html>");

    Html(page).into_response()
}

/// Escapes the characters that are significant in HTML text
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// GET /ping - 200 when the database answers, 500 otherwise
pub async fn ping(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            error!(backend = state.store.backend(), error = %e, "Ping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response()
        }
    }
}
