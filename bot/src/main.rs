use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use babel_bot::config::BotConfig;
use babel_bot::engine::tracker::DonationTracker;
use babel_bot::irc::client::IrcClient;
use babel_bot::irc::roster::NetworkState;
use babel_bot::ledger::store::{JsonFileStore, LedgerStore};
use babel_bot::tasks::{spawn_liveness_ping, spawn_sweeper};
use babel_bot::web::app_state::AppState;
use babel_bot::web::router::build_router;

#[derive(Parser)]
#[command(name = "babel-bot", about = "Tracks donations toward the Torre de Babel")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "babel.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = BotConfig::load(&cli.config)?;

    let store = JsonFileStore::new(&config.ledger.path);
    // A corrupt ledger stops startup
    let ledger = store
        .load()
        .await
        .with_context(|| format!("failed to read ledger {}", config.ledger.path))?;
    info!(
        path = %config.ledger.path,
        communities = ledger.communities.len(),
        "ledger loaded"
    );

    let tracker = Arc::new(DonationTracker::from_config(store, &config));
    let network = Arc::new(NetworkState::new());
    let cancel = CancellationToken::new();

    let irc = IrcClient::new(
        config.irc.clone(),
        &config.signals.companion_nicks,
        tracker.clone(),
        network.clone(),
    );
    let irc_handle = tokio::spawn(irc.run(cancel.clone()));

    let sweeper = spawn_sweeper(
        tracker.clone(),
        Duration::from_secs(config.donations.sweep_interval_secs),
        cancel.clone(),
    );
    let liveness = spawn_liveness_ping(
        tracker.clone(),
        network.clone(),
        Duration::from_secs(config.donations.liveness_interval_secs),
        cancel.clone(),
    );

    let app = build_router(Arc::new(AppState {
        tracker,
        network,
        started_at: Utc::now(),
    }));

    let listener = tokio::net::TcpListener::bind(&config.web.address)
        .await
        .with_context(|| format!("failed to bind web listener on {}", config.web.address))?;

    info!(
        "Babel bot starting (IRC {}:{} {:?}, web {})",
        config.irc.server, config.irc.port, config.irc.channels, config.web.address
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown requested");
        shutdown.cancel();
    });

    let web_cancel = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { web_cancel.cancelled().await })
        .await;

    // The web server may also stop on its own
    cancel.cancel();
    let _ = tokio::join!(irc_handle, sweeper, liveness);
    info!("Babel bot stopped");

    served.context("web server error")
}
