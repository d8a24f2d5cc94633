use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use zapgate::cleanup;
use zapgate::config::Config;
use zapgate::gateway::{Connector, SubprocessConnector};
use zapgate::server::{self, AppState};
use zapgate::session::{ManagerSettings, SessionManager, SessionStore};

// ============================================================================
// CLI Types
// ============================================================================

/// zapgate - multi-tenant WhatsApp session manager
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(host) = cli.host {
        config.host = host.to_string();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    tokio::fs::create_dir_all(&config.sessions_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create sessions directory {}",
                config.sessions_dir.display()
            )
        })?;

    let store = Arc::new(SessionStore::new(&config.clients_file));
    let connector: Arc<dyn Connector> = Arc::new(SubprocessConnector::new(
        config.bridge_command.clone(),
        config.bridge_args.clone(),
        config.sessions_dir.clone(),
    ));
    let manager = Arc::new(SessionManager::new(
        store,
        connector,
        ManagerSettings::from(&config),
    ));

    // Reconnect every session recorded in the snapshot
    let summary = manager.restore_persisted_sessions().await;
    if summary.restored > 0 || !summary.errors.is_empty() {
        info!(
            restored = summary.restored,
            errors = summary.errors.len(),
            "Restored persisted sessions"
        );
    }

    if config.cleanup_interval_seconds > 0 {
        cleanup::spawn_cleanup_task(
            manager.registry().clone(),
            config.sessions_dir.clone(),
            config.cleanup_interval_seconds,
        );
    }

    let state = AppState {
        manager: manager.clone(),
    };
    let app = server::build_app(state, &config);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    manager.shutdown_all().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_err() {
        error!("Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
