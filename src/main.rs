//! socks5proxy - SOCKS5 proxy server entry point

use anyhow::Result;
use clap::Parser;
use socks5proxy::config::{load_config, load_logging_settings, LoggingSettings};
use socks5proxy::names::FriendlyNames;
use socks5proxy::server::Server;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Path of the optional logging settings file
const APPSETTINGS_PATH: &str = "appsettings.json";

/// SOCKS5 proxy server with CONNECT and UDP ASSOCIATE support
#[derive(Parser, Debug)]
#[command(name = "socks5proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the proxy configuration file
    #[arg(short, long, default_value = "proxy.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let logging = load_logging_settings(APPSETTINGS_PATH)?;
    setup_logging(&logging)?;

    let config = load_config(&args.config)?;
    info!(version = socks5proxy::VERSION, config = %args.config.display(), "Starting socks5proxy");

    let names = Arc::new(FriendlyNames::from_mappings(&config.ip_address_mappings));

    // Single cancellation signal: interactive interrupt or SIGTERM begins
    // a graceful shutdown instead of exiting outright.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("Received Ctrl+C, shutting down...");
                        }
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM, shutting down...");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received Ctrl+C, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        signal_cancel.cancel();
    });

    let server = Server::from_config(&config, names).await?;
    server.run(cancel).await?;

    info!("Shutdown complete");
    Ok(())
}

/// Configure the tracing subscriber from the logging settings
fn setup_logging(settings: &LoggingSettings) -> Result<()> {
    let level = match settings.minimum_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if settings.json_format {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
