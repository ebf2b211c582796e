//! # asknow-agent
//!
//! AskNow realtime server binary. Wires settings, logging, metrics and the
//! user directory into the realtime server and runs it until ctrl-c.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use asknow_directory::{IdentityResolver, InMemoryDirectory, PendingItems, SqliteDirectory};
use asknow_realtime::{RealtimeConfig, RealtimeServer};
use asknow_settings::AskNowSettings;
use clap::Parser;

/// How long the listener and live connections get to close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// AskNow realtime notification server.
#[derive(Parser, Debug)]
#[command(name = "asknow-agent", about = "AskNow realtime notification server")]
struct Cli {
    /// Settings file (defaults to `~/.asknow/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the AskNow `SQLite` database (opened read-only).
    #[arg(long)]
    database: Option<PathBuf>,
}

/// Load settings and apply command-line overrides on top.
fn resolve_settings(cli: &Cli) -> Result<AskNowSettings> {
    let path = cli.settings.clone().unwrap_or_else(asknow_settings::settings_path);
    let mut settings = asknow_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(database) = &cli.database {
        settings.directory.database_path = Some(database.display().to_string());
    }
    Ok(settings)
}

type Directory = (Arc<dyn IdentityResolver>, Arc<dyn PendingItems>);

fn open_directory(database_path: Option<&str>) -> Result<Directory> {
    if let Some(path) = database_path {
        let directory = Arc::new(
            SqliteDirectory::open(Path::new(path))
                .with_context(|| format!("Failed to open database: {path}"))?,
        );
        tracing::info!(path, "user directory backed by SQLite");
        let identities: Arc<dyn IdentityResolver> = directory.clone();
        let pending: Arc<dyn PendingItems> = directory;
        return Ok((identities, pending));
    }
    tracing::warn!("no database configured, every connection will be rejected as unknown");
    let directory = Arc::new(InMemoryDirectory::new());
    let identities: Arc<dyn IdentityResolver> = directory.clone();
    let pending: Arc<dyn PendingItems> = directory;
    Ok((identities, pending))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = resolve_settings(&args)?;

    asknow_core::logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let (identities, pending) = open_directory(settings.directory.database_path.as_deref())?;
    let config = RealtimeConfig::from_settings(&settings);
    let mut server = RealtimeServer::new(config, identities, pending);
    match asknow_realtime::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics disabled"),
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("AskNow realtime server listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let remaining = server
        .shutdown()
        .graceful_shutdown(vec![handle], server.registry(), Some(SHUTDOWN_TIMEOUT))
        .await;

    tracing::info!(remaining, "Shutdown complete");
    Ok(())
}
