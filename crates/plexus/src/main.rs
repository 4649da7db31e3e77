//! Plexus host
//!
//! Loads the configured plugins and keeps them running until interrupted.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use plexus::{HostConfig, PluginHost};

/// Plexus plugin host
#[derive(Parser, Debug)]
#[command(name = "plexus")]
#[command(about = "Process-isolated plugin host", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Plugin executable to load (repeatable), after the configured ones
    #[arg(short, long = "plugin")]
    plugins: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plexus=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Starting plexus host v{}", env!("CARGO_PKG_VERSION"));

    let config = HostConfig::load(args.config.as_deref())?;
    let host = PluginHost::new(config);

    if let Err(e) = load_plugins(&host, &args.plugins) {
        error!("Failed to load plugins: {}", e);
        host.shutdown();
        return Err(e.into());
    }
    info!("Running with plugins: {:?}", host.plugin_list());

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(shutdown_signal());

    host.shutdown();
    info!("Host shutdown complete");
    Ok(())
}

fn load_plugins(host: &std::sync::Arc<PluginHost>, extra: &[PathBuf]) -> plexus::Result<()> {
    host.load_configured()?;
    for file in extra {
        host.load_plugin(file, &())?;
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
