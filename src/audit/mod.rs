// Audit module - notifies observers about accepted metric writes
//
// Delivery is at-most-once and best-effort: events are handed to background
// tasks and are lost if the process stops before the task completes.

pub mod file;
pub mod http;
pub mod publisher;

pub use file::FileObserver;
pub use http::HttpObserver;
pub use publisher::AuditPublisher;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised by an observer while delivering an event
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("failed to encode audit event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write audit file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to deliver audit event: {0}")]
    Http(#[from] reqwest::Error),
}

/// One accepted write: which metrics changed and who sent them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unix timestamp in seconds
    pub ts: i64,
    pub metrics: Vec<String>,
    pub ip_address: String,
}

impl AuditEvent {
    pub fn new(metrics: Vec<String>, ip_address: impl Into<String>) -> Self {
        AuditEvent {
            ts: chrono::Utc::now().timestamp(),
            metrics,
            ip_address: ip_address.into(),
        }
    }
}

/// Receiver of audit events
#[async_trait]
pub trait Observer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn notify(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Resolves the caller's address
///
/// Uses the first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer
/// address of the connection.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_event_json_shape() {
        let event = AuditEvent {
            ts: 1234567890,
            metrics: vec!["Metric1".to_string(), "Metric2".to_string()],
            ip_address: "10.0.0.1".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"ts":1234567890,"metrics":["Metric1","Metric2"],"ip_address":"10.0.0.1"}"#
        );
    }

    #[test]
    fn test_new_event_uses_current_time() {
        let event = AuditEvent::new(vec!["Alloc".to_string()], "192.168.1.1");
        let now = chrono::Utc::now().timestamp();
        assert!((now - event.ts).abs() <= 1);
        assert_eq!(event.ip_address, "192.168.1.1");
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "127.0.0.1");
        assert_eq!(client_ip(&headers, None), "");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.2");

        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
    }
}
