// Configuration module - command-line flags with environment overrides
//
// Each binary parses its flags with clap, then applies environment variables on
// top of them. An environment variable that is set and non-empty always wins.
//
// Lookups go through a closure instead of `std::env` directly so the override
// rules can be tested without touching the process environment.

use clap::Parser;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::logging::mask_credentials;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    InvalidInterval(&'static str),
}

/// Command-line flags of the agent
#[derive(Debug, Clone, Parser)]
#[command(
    name = "telemetry-agent",
    version,
    about = "Samples runtime and host metrics and ships them to the collector"
)]
pub struct AgentArgs {
    /// Address of the collector (host:port or full URL)
    #[arg(short = 'a', long = "address", default_value = "localhost:8080")]
    pub address: String,

    /// Poll interval in seconds
    #[arg(short = 'p', long = "poll-interval", default_value_t = 2)]
    pub poll_interval: u64,

    /// Report interval in seconds
    #[arg(short = 'r', long = "report-interval", default_value_t = 10)]
    pub report_interval: u64,

    /// Shared secret for HashSHA256 signing (empty disables signing)
    #[arg(short = 'k', long = "key", default_value = "")]
    pub key: String,

    /// Number of concurrent sender workers
    #[arg(short = 'l', long = "rate-limit", default_value_t = 10)]
    pub rate_limit: usize,
}

/// Command-line flags of the collector server
#[derive(Debug, Clone, Parser)]
#[command(
    name = "telemetry-server",
    version,
    about = "Receives, validates and stores metrics sent by telemetry agents"
)]
pub struct ServerArgs {
    /// Listen address
    #[arg(short = 'a', long = "address", default_value = "localhost:8080")]
    pub address: String,

    /// Snapshot interval in seconds (0 saves after every write)
    #[arg(short = 'i', long = "store-interval", default_value_t = 300)]
    pub store_interval: u64,

    /// Snapshot file path (empty disables file persistence)
    #[arg(short = 'f', long = "file-storage-path", default_value = "/tmp/metrics-db.json")]
    pub file_storage_path: String,

    /// Load the snapshot file on startup
    #[arg(short = 'r', long = "restore", default_value_t = true, action = clap::ArgAction::Set)]
    pub restore: bool,

    /// PostgreSQL connection string
    #[arg(short = 'd', long = "database-dsn", default_value = "")]
    pub database_dsn: String,

    /// Shared secret for HashSHA256 verification (empty disables it)
    #[arg(short = 'k', long = "key", default_value = "")]
    pub key: String,

    /// Append audit events to this file
    #[arg(long = "audit-file", default_value = "")]
    pub audit_file: String,

    /// POST audit events to this URL
    #[arg(long = "audit-url", default_value = "")]
    pub audit_url: String,
}

/// Effective agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the collector, always with a scheme
    pub server_url: String,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub key: Option<String>,
    pub rate_limit: usize,
}

impl AgentConfig {
    /// Loads the configuration from the process arguments and environment
    ///
    /// Exits the process on malformed flags or `--help`, as clap does.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(AgentArgs::parse(), |name| std::env::var(name).ok())
    }

    /// Builds the configuration from parsed flags and an environment lookup
    ///
    /// # Arguments
    /// * `args` - Parsed command-line flags
    /// * `lookup` - Returns the value of an environment variable, if set
    ///
    /// # Returns
    /// * `Ok(AgentConfig)` - Effective configuration
    /// * `Err(ConfigError)` - An interval resolved to zero
    pub fn from_args<F>(mut args: AgentArgs, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        env_override(&lookup, "ADDRESS", &mut args.address);
        env_override(&lookup, "POLL_INTERVAL", &mut args.poll_interval);
        env_override(&lookup, "REPORT_INTERVAL", &mut args.report_interval);
        env_override(&lookup, "KEY", &mut args.key);
        env_override(&lookup, "RATE_LIMIT", &mut args.rate_limit);

        if args.poll_interval == 0 {
            return Err(ConfigError::InvalidInterval("poll interval"));
        }
        if args.report_interval == 0 {
            return Err(ConfigError::InvalidInterval("report interval"));
        }

        let config = AgentConfig {
            server_url: with_scheme(&args.address),
            poll_interval: Duration::from_secs(args.poll_interval),
            report_interval: Duration::from_secs(args.report_interval),
            key: non_empty(args.key),
            rate_limit: args.rate_limit.max(1),
        };

        info!(
            server_url = %config.server_url,
            poll_interval_s = args.poll_interval,
            report_interval_s = args.report_interval,
            rate_limit = config.rate_limit,
            signing = config.key.is_some(),
            "Agent configuration loaded"
        );

        Ok(config)
    }
}

/// Effective server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    /// Snapshot interval in seconds, 0 for synchronous persistence
    pub store_interval: u64,
    pub file_storage_path: Option<PathBuf>,
    pub restore: bool,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
    pub audit_file: Option<PathBuf>,
    pub audit_url: Option<String>,
}

impl ServerConfig {
    /// Loads the configuration from the process arguments and environment
    pub fn load() -> Self {
        Self::from_args(ServerArgs::parse(), |name| std::env::var(name).ok())
    }

    /// Builds the configuration from parsed flags and an environment lookup
    pub fn from_args<F>(mut args: ServerArgs, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        env_override(&lookup, "ADDRESS", &mut args.address);
        env_override(&lookup, "STORE_INTERVAL", &mut args.store_interval);
        env_override(&lookup, "FILE_STORAGE_PATH", &mut args.file_storage_path);
        env_override(&lookup, "RESTORE", &mut args.restore);
        env_override(&lookup, "DATABASE_DSN", &mut args.database_dsn);
        env_override(&lookup, "KEY", &mut args.key);
        env_override(&lookup, "AUDIT_FILE", &mut args.audit_file);
        env_override(&lookup, "AUDIT_URL", &mut args.audit_url);

        let config = ServerConfig {
            address: args.address,
            store_interval: args.store_interval,
            file_storage_path: non_empty(args.file_storage_path).map(PathBuf::from),
            restore: args.restore,
            database_dsn: non_empty(args.database_dsn),
            key: non_empty(args.key),
            audit_file: non_empty(args.audit_file).map(PathBuf::from),
            audit_url: non_empty(args.audit_url),
        };

        let database = config
            .database_dsn
            .as_deref()
            .map(mask_credentials)
            .unwrap_or_else(|| "none".to_string());
        info!(
            address = %config.address,
            store_interval_s = config.store_interval,
            file = ?config.file_storage_path,
            restore = config.restore,
            database = %database,
            signing = config.key.is_some(),
            "Server configuration loaded"
        );

        config
    }
}

/// Replaces `target` with the parsed environment value when it is set
fn env_override<F, T>(lookup: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(name).filter(|value| !value.is_empty()) else {
        return;
    };

    match raw.parse::<T>() {
        Ok(value) => *target = value,
        Err(e) => warn!(
            variable = name,
            value = %raw,
            error = %e,
            "Ignoring invalid environment value"
        ),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn with_scheme(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}
