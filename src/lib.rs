// Telemetry pipeline - agent and collector server
//
// The agent samples process and host gauges on a poll interval and ships the
// latest snapshot to the collector on a report interval. The collector
// validates batches, stores them in memory, a JSON snapshot file or
// PostgreSQL, and notifies audit observers about committed writes.
//
// # Features
// - Gzip-compressed JSON batches with per-sample fallback
// - HMAC-SHA256 request signing (`HashSHA256` header)
// - Classifier-driven retries with a fixed backoff schedule
// - All-or-nothing batch commits where the backend supports them
// - Pluggable audit observers (file, HTTP)

pub mod agent;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod logging;
pub mod model;
pub mod retry;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod storage;
