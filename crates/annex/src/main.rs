//! Annex Server
//!
//! Plugin record API, bundled environment builder and plugin host.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use annex::config::AnnexConfig;
use annex::environment::{CommandResolver, Resolver};
use annex::lifecycle::status_counts;
use annex::plugin::ServicePluginRegistry;
use annex::server::{AppState, create_router};
use annex::store::{PluginStore, RedbStore};
use annex::{AnnexHost, builtin};

/// Annex plugin host
#[derive(Parser, Debug)]
#[command(name = "annex")]
#[command(about = "Plugin lifecycle and bundled environment builder", long_about = None)]
struct Cli {
    /// Configuration file (missing file is fine)
    #[arg(short, long, default_value = "annex.toml", global = true)]
    config: PathBuf,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile plugins and serve the HTTP API
    Serve {
        /// Serve the record API with no plugins active
        #[arg(long)]
        clean: bool,

        /// Server host address
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Build the bundled environment from the accepted plugin set
    Build {
        /// Rebuild even if the bundle directory exists
        #[arg(long)]
        force_rebuild: bool,
    },

    /// Print every plugin record
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(format!("annex={},tower_http=debug", cli.log_level))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AnnexConfig::load(Some(&cli.config))
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let result = match cli.command {
        Command::Serve { clean, host, port } => serve(config, clean, host, port).await,
        Command::Build { force_rebuild } => build(config, force_rebuild).await,
        Command::List => list(config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn open_host(config: &AnnexConfig) -> Result<AnnexHost> {
    let store: Arc<dyn PluginStore> = Arc::new(
        RedbStore::open(&config.store.path)
            .with_context(|| format!("failed to open {}", config.store.path.display()))?,
    );
    let resolver: Arc<dyn Resolver> = Arc::new(CommandResolver::new(&config.resolver));
    let catalog = builtin::catalog()?;
    Ok(AnnexHost::new(config, store, resolver, catalog))
}

async fn serve(
    config: AnnexConfig,
    clean: bool,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    info!("Starting Annex server v{}", env!("CARGO_PKG_VERSION"));
    let annex = open_host(&config)?;

    if clean {
        info!("Clean mode: no plugins will be activated");
    } else {
        let report = annex.orchestrator.reconcile().await?;
        info!(
            "Reconciled plugins: {} discovered, {} promoted, {} activated, {} failed",
            report.discovered.len(),
            report.promoted.len(),
            report.activated.len(),
            report.failed.len()
        );
        for warning in &report.warnings {
            warn!("Discovery: {}", warning);
        }
        for id in &report.restart_required {
            warn!("Plugin {} changed version; restart to load the new code", id);
        }
        for err in annex.registry.start_all().await {
            error!("{}", err);
        }
    }

    let names = annex.registry.names();
    if names.is_empty() {
        info!("No plugins active");
    } else {
        info!("Active plugins:");
        for name in &names {
            info!("  - {}", name);
        }
    }

    let state = AppState::new(
        annex.lifecycle.clone(),
        annex.registry.clone(),
        config.lock.wait(),
    );
    let app = create_router(state, annex.routes.router());

    let host = host.unwrap_or(config.server.host);
    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(annex.registry.clone()))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn build(config: AnnexConfig, force_rebuild: bool) -> Result<()> {
    if config.bundle.dir.exists() && !force_rebuild {
        info!(
            "Bundled environment already exists at {}; pass --force-rebuild to rebuild",
            config.bundle.dir.display()
        );
        return Ok(());
    }

    let annex = open_host(&config)?;
    let report = annex.lifecycle.build().await?;

    info!(
        "Bundled environment ready at {} with {} plugin(s)",
        report.target.display(),
        report.plugins.len()
    );
    for spec in &report.plugins {
        info!("  - {}", spec.to_line(&config.manifest.pin_operator));
    }
    Ok(())
}

fn list(config: AnnexConfig) -> Result<()> {
    let annex = open_host(&config)?;
    let records = annex.lifecycle.list()?;

    for record in &records {
        println!(
            "{}  {:<24} {:<12} installed={} requested={}",
            record.id,
            record.name,
            record.status.to_string(),
            record.installed_version.as_deref().unwrap_or("-"),
            record.updated_version.as_deref().unwrap_or("-"),
        );
        if let Some(message) = &record.error_message {
            println!("    error: {}", message);
        }
    }

    let summary: Vec<String> = status_counts(&records)
        .iter()
        .map(|(status, count)| format!("{}={}", status, count))
        .collect();
    println!("{} plugin(s): {}", records.len(), summary.join(" "));
    Ok(())
}

/// Wait for shutdown signal and stop plugins
async fn shutdown_signal(registry: Arc<ServicePluginRegistry>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }

    info!("Stopping plugins...");
    registry.stop_all().await;
}
