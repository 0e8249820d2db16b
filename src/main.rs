//! TVM Relay - webhook to exchange order relay
//!
//! This is the main entry point: it loads configuration and accounts, then serves
//! the alert webhook until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tvm_relay::{web, RelayConfig};
use tvm_relay_core::{AccountRegistry, Dispatcher, HttpConnectorFactory};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (optional; relay.toml and config/relay.toml are always tried)
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Log level (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for the daily rolling JSON log file
    #[arg(long, default_value = "logs")]
    log_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    // The guard flushes the file writer on exit
    let _log_guard = init_tracing(&args.log_level, &args.log_dir)?;

    info!("Starting TVM relay v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        RelayConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    let registry = AccountRegistry::parse(&config.account_records()?);
    if registry.is_empty() {
        warn!("Account registry is empty");
    } else {
        info!(accounts = ?registry.ids(), "Account registry loaded");
    }

    let factory = HttpConnectorFactory::new(config.request_timeout(), config.endpoints())
        .context("failed to build exchange HTTP client")?;
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        Arc::new(factory),
        config.dispatcher_config(),
    ));

    web::serve(config.bind_address, dispatcher).await?;

    info!("TVM relay shut down gracefully");
    Ok(())
}

fn init_tracing(log_level: &str, log_dir: &str) -> Result<WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Define log file appender (rolling daily)
    let file_appender = tracing_appender::rolling::daily(log_dir, "tvm-relay.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let level_filter = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(EnvFilter::from_default_env().add_directive(level_filter.into()));

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(EnvFilter::from_default_env().add_directive(level_filter.into()));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
