use std::path::PathBuf;
use std::sync::Arc;

use accounts_cache::Cache;
use accounts_client::{AccountsHttpClient, AccountsSource, ApiConfig};
use accounts_proxy::AccountsServer;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Node-local accounts proxy daemon.
///
/// Answers name-service queries over a local Unix socket, backed by the
/// upstream Accounts API. Daemonization, PID files, and log rotation are the
/// caller's responsibility (run under your process supervisor of choice).
#[derive(Parser, Debug)]
#[command(name = "compute-accounts-proxy", version, about)]
struct Cli {
    /// Logging verbosity: error, warn, info, debug, or trace.
    #[arg(long, default_value = "info")]
    logging_level: String,

    /// Root URL of the Accounts/Compute API.
    #[arg(long, default_value = "https://www.googleapis.com/")]
    api_root: String,

    /// Accounts API version.
    #[arg(long, default_value = "alpha")]
    ca_version: String,

    /// Compute API version, used to build the instance self-link.
    #[arg(long, default_value = "v1")]
    compute_version: String,

    /// Path of the Unix-domain socket to serve on.
    #[arg(long, default_value = "/var/run/compute_accounts/sock")]
    socket_path: PathBuf,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.logging_level);

    let config = ApiConfig {
        api_root: cli.api_root,
        ca_version: cli.ca_version,
        compute_version: cli.compute_version,
    };

    let cache = Arc::new(Cache::new());
    let source: Arc<dyn AccountsSource> = Arc::new(AccountsHttpClient::new(config));
    let server = Arc::new(AccountsServer::new(cli.socket_path, cache, source));

    let shutdown_server = Arc::clone(&server);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        if let Err(err) = shutdown_server.shutdown().await {
            error!(error = %err, "error while shutting down");
        }
    });

    if let Err(err) = server.start().await {
        error!(error = %err, "server exited with a fatal error");
        return Err(err.into());
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
