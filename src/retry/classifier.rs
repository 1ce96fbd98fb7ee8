// Error classification for the retry executor
//
// Rules are checked over the whole `source()` chain, most specific first:
// typed transport/database errors, then the agent's own status errors, then a
// keyword match over the rendered messages. Anything unrecognised is permanent.

use reqwest::StatusCode;
use std::error::Error;
use std::io;

use crate::agent::sender::SendError;

/// Whether a failed attempt is worth repeating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retriable,
    NonRetriable,
}

/// Strategy deciding if an error is transient
///
/// Implementations must be pure: the same error always yields the same answer.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, err: &(dyn Error + 'static)) -> Classification;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&(dyn Error + 'static)) -> Classification + Send + Sync,
{
    fn classify(&self, err: &(dyn Error + 'static)) -> Classification {
        self(err)
    }
}

/// Default taxonomy: network faults, transient PostgreSQL failures and
/// overload statuses (429/502/503/504) are retriable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorClassifier;

const NETWORK_SIGNATURES: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection aborted",
    "broken pipe",
    "no route to host",
    "network is unreachable",
    "temporary failure",
    "i/o timeout",
    "timed out",
    "timeout",
];

const STATUS_SIGNATURES: &[&str] = &[
    "429 too many requests",
    "502 bad gateway",
    "503 service unavailable",
    "504 gateway timeout",
];

impl ErrorClassifier for DefaultErrorClassifier {
    fn classify(&self, err: &(dyn Error + 'static)) -> Classification {
        let mut current: Option<&(dyn Error + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(verdict) = classify_typed(e) {
                return verdict;
            }
            current = e.source();
        }

        let mut text = String::new();
        let mut current: Option<&(dyn Error + 'static)> = Some(err);
        while let Some(e) = current {
            text.push_str(&e.to_string().to_lowercase());
            text.push('\n');
            current = e.source();
        }

        if NETWORK_SIGNATURES.iter().any(|s| text.contains(s))
            || STATUS_SIGNATURES.iter().any(|s| text.contains(s))
        {
            return Classification::Retriable;
        }

        Classification::NonRetriable
    }
}

/// Returns a verdict when `err` is one of the error types with known semantics
fn classify_typed(err: &(dyn Error + 'static)) -> Option<Classification> {
    if let Some(e) = err.downcast_ref::<SendError>() {
        if let SendError::UnexpectedStatus(status) = e {
            return Some(classify_status(*status));
        }
        return None;
    }

    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        if e.is_timeout() || e.is_connect() {
            return Some(Classification::Retriable);
        }
        if let Some(status) = e.status() {
            return Some(classify_status(status));
        }
        return None;
    }

    if let Some(e) = err.downcast_ref::<io::Error>() {
        return Some(classify_io(e.kind()));
    }

    if let Some(e) = err.downcast_ref::<sqlx::Error>() {
        return classify_sqlx(e);
    }

    None
}

fn classify_status(status: StatusCode) -> Classification {
    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Classification::Retriable,
        _ => Classification::NonRetriable,
    }
}

fn classify_io(kind: io::ErrorKind) -> Classification {
    match kind {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::TimedOut
        | io::ErrorKind::Interrupted => Classification::Retriable,
        _ => Classification::NonRetriable,
    }
}

fn classify_sqlx(err: &sqlx::Error) -> Option<Classification> {
    match err {
        sqlx::Error::Database(db) => Some(match db.code() {
            Some(code) => classify_sqlstate(&code),
            None => Classification::NonRetriable,
        }),
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Some(Classification::Retriable),
        _ => None,
    }
}

/// PostgreSQL SQLSTATE codes worth retrying
///
/// Class 08 is connection exception, class 40 is transaction rollback
/// (including 40001 serialization failure and 40P01 deadlock) and 57P03 is
/// "cannot connect now".
fn classify_sqlstate(code: &str) -> Classification {
    if code.starts_with("08") || code.starts_with("40") || code == "57P03" {
        Classification::Retriable
    } else {
        Classification::NonRetriable
    }
}
