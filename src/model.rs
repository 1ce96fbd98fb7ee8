// Metric model shared by the agent and the collector server
//
// A sample travels on the wire as `{id, type, value?, delta?}`. The same record
// shape is used for the batch endpoint, the single-item endpoints and the
// persisted store snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of a metric: gauges are overwritten, counters accumulate deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a textual metric type is neither `gauge` nor `counter`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported metric type: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for MetricKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// A sample whose kind/value invariant has been checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

/// A sample that declares a kind but lacks the matching field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    #[error("gauge metric '{0}' missing value")]
    MissingValue(String),

    #[error("counter metric '{0}' missing delta")]
    MissingDelta(String),

    #[error("gauge metric '{0}' has a non-finite value")]
    NonFiniteValue(String),
}

/// One metric sample as exchanged between agent and server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MetricKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricSample {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        MetricSample {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        MetricSample {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Returns the value matching the declared kind.
    ///
    /// A gauge without a finite `value` or a counter without `delta` is
    /// rejected; the field belonging to the other kind is ignored.
    pub fn payload(&self) -> Result<MetricValue, SampleError> {
        match self.kind {
            MetricKind::Gauge => match self.value {
                Some(value) if value.is_finite() => Ok(MetricValue::Gauge(value)),
                Some(_) => Err(SampleError::NonFiniteValue(self.id.clone())),
                None => Err(SampleError::MissingValue(self.id.clone())),
            },
            MetricKind::Counter => self
                .delta
                .map(MetricValue::Counter)
                .ok_or_else(|| SampleError::MissingDelta(self.id.clone())),
        }
    }

    /// Renders the value as the plain-text literal accepted by `Store::update`.
    pub fn raw_value(&self) -> Result<String, SampleError> {
        Ok(match self.payload()? {
            MetricValue::Gauge(v) => v.to_string(),
            MetricValue::Counter(d) => d.to_string(),
        })
    }
}
