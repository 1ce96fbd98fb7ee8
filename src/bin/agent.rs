// Telemetry agent - samples gauges and reports them to the collector
//
// # Usage
// telemetry-agent -a localhost:8080 -p 2 -r 10 -k <secret> -l 10
//
// Environment variables ADDRESS, POLL_INTERVAL, REPORT_INTERVAL, KEY and
// RATE_LIMIT override the flags.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use telemetry_pipeline::agent::metrics::create_all_sources;
use telemetry_pipeline::agent::{AgentScheduler, Collector, MetricsSender};
use telemetry_pipeline::config::AgentConfig;
use telemetry_pipeline::logging::init_logging;
use telemetry_pipeline::shutdown::shutdown_signal;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("=== Telemetry Agent Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load().context("Invalid agent configuration")?;
    info!(
        server = %config.server_url,
        signed = config.key.is_some(),
        "Agent configured"
    );

    let sender = MetricsSender::new(config.server_url.clone(), config.key.clone())
        .context("Failed to build HTTP client")?;

    let sources = create_all_sources();
    info!("Created {} metric source(s)", sources.len());

    let cancel = CancellationToken::new();
    let scheduler = AgentScheduler::from_config(&config);
    let run = tokio::spawn(scheduler.run(
        Collector::new(sources),
        Arc::new(sender),
        cancel.clone(),
    ));

    info!("Press Ctrl+C to stop");
    shutdown_signal().await;

    cancel.cancel();
    run.await.context("Agent scheduler panicked")?;

    info!("=== Telemetry Agent Stopped ===");
    Ok(())
}
