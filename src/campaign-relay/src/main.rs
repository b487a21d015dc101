//! Campaign Relay runs repeating messaging campaigns behind an HTTP API.
//!
//! Main entry point that wires configuration, the transport, the campaign
//! orchestrator and the HTTP server together.

use campaign_api::ApiServer;
use campaign_channels::{ScriptedTransportFactory, TransportFactory, WhatsAppTransportFactory};
use campaign_core::config::AppConfig;
use campaign_core::event_bus::TracingSink;
use campaign_dispatch::{InMemoryCampaignStore, Orchestrator};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Parser, Debug)]
#[command(name = "campaign-relay")]
#[command(about = "Runs repeating messaging campaigns behind an HTTP API")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (environment variables override it)
    #[arg(long, env = "CAMPAIGN_RELAY_CONFIG")]
    config: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPAIGN_RELAY__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Deliver to an in-process scripted transport instead of WhatsApp
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "campaign_relay=info,campaign_dispatch=info,campaign_api=info,tower_http=info".into()
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

fn build_transport(config: &AppConfig, dry_run: bool) -> anyhow::Result<Arc<dyn TransportFactory>> {
    if dry_run {
        warn!(
            retained = campaign_channels::scripted::DEFAULT_LOG_CAPACITY,
            "Dry-run mode: recent sends are kept in memory, nothing is delivered"
        );
        return Ok(Arc::new(ScriptedTransportFactory::new()));
    }
    Ok(Arc::new(WhatsAppTransportFactory::new(config.whatsapp.clone())?))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Campaign Relay starting up");

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => return Err(e.into()),
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }
    };

    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        dry_run = cli.dry_run,
        "Configuration loaded"
    );

    let factory = build_transport(&config, cli.dry_run)?;
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(InMemoryCampaignStore::new()),
        factory,
        Arc::new(TracingSink),
        config.dispatch.clone(),
    ));

    let api_server = ApiServer::new(config.clone(), orchestrator.clone());

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Campaign Relay is ready to serve traffic");

    // Blocks until ctrl-c, then stops every running campaign.
    let served = api_server.start_http(shutdown_signal()).await;
    let stopped = orchestrator.shutdown().await;
    info!(stopped = stopped, "Campaign Relay shut down");

    served
}
