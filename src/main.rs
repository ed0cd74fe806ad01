// Auction hub entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not the terminal)
// 2. Load config
// 3. Open the SQLite document store
// 4. Build the session controller
// 5. Create the hub channel
// 6. Spawn the WebSocket hub task
// 7. Spawn the session loop task
// 8. Wait for Ctrl+C
// 9. Cleanup on exit

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

use auction_hub::auction::session::SessionController;
use auction_hub::config;
use auction_hub::store::sqlite::SqliteStore;
use auction_hub::ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Auction hub starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: ws {}:{}, store at {}",
        config.bind, config.ws_port, config.db_path
    );

    // 3. Open the document store
    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        std::fs::create_dir_all(parent).context("failed to create data directory")?;
    }
    let store = Arc::new(SqliteStore::open(&config.db_path).context("failed to open store")?);

    // 4. Build the session controller
    let controller = SessionController::with_free_team_limit(store, config.free_team_limit);

    // 5. Create the hub channel
    let (hub_tx, hub_rx) = mpsc::channel(256);

    // 6. Spawn the WebSocket hub task
    let bind = config.bind.clone();
    let ws_port = config.ws_port;
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(&bind, ws_port, hub_tx).await {
            error!("WebSocket hub error: {}", e);
        }
    });

    // 7. Spawn the session loop task
    let app_handle = tokio::spawn(async move {
        if let Err(e) = auction_hub::app::run(controller, hub_rx).await {
            error!("Session loop error: {}", e);
        }
    });

    // 8. Wait for shutdown
    info!(
        "Auction hub ready. WebSocket hub listening on {}:{}",
        config.bind, config.ws_port
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    // 9. Cleanup: both tasks loop forever, stop them directly.
    ws_handle.abort();
    app_handle.abort();

    info!("Auction hub shut down cleanly");
    Ok(())
}

/// Initialize tracing to a log file so stdout stays clean for operators.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("auction-hub.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("auction_hub=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
