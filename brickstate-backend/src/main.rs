use anyhow::Context;
use brickstate_backend::config::Config;
use brickstate_backend::console::{ConsoleHost, ProcessConsole};
use brickstate_backend::consumers::JsonLinesConsumer;
use brickstate_backend::{Tracker, create_app};
use brickstate_db::Database;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging. Stdout carries consumer events.
    #[cfg(debug_assertions)]
    let log_level = "debug";
    #[cfg(not(debug_assertions))]
    let log_level = "info";

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting brickstate...");

    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, db_path={}, minigame_interval={}ms, leaderboard_interval={}ms, join_retries={}, consumers={:?}",
        config.port,
        config.database_path,
        config.minigame_check_interval.as_millis(),
        config.leaderboard_check_interval.as_millis(),
        config.join_retry_limit,
        config.consumers
    );

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("opening database at {}", config.database_path))?;

    let command = config
        .server_command
        .clone()
        .context("SERVER_COMMAND environment variable is required")?;
    let console = Arc::new(ProcessConsole::spawn(&command)?);
    let mut output = console.subscribe_lines();

    let host = ConsoleHost::new(
        Arc::clone(&console),
        JsonLinesConsumer::stdout_set(&config.consumers),
        config.chunk_options(),
    );
    let tracker = Arc::new(Tracker::new(host, db, config.tracker_options()));

    if let Err(e) = tracker.restore().await {
        tracing::warn!(error = %e, "could not restore previous state, starting empty");
    }
    tracker.start();

    let feed = {
        let tracker = Arc::clone(&tracker);
        tokio::spawn(async move {
            loop {
                match output.recv().await {
                    Ok(raw) => {
                        tracker.handle_line(&raw).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "log feed lagged, lines dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::info!("log feed ended");
        })
    };

    let app = create_app(
        Arc::clone(&tracker),
        config.request_body_limit,
        config.request_timeout,
    );
    let addr = format!("127.0.0.1:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Control API listening on {}", addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
        })
        .await;
    if let Err(e) = result {
        tracing::error!("Axum server error: {}", e);
    }

    feed.abort();
    tracker.shutdown().await;
    Ok(())
}
