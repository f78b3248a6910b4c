use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gotel_core::config::{Cli, GotelConfig};
use gotel_core::store::Store;
use gotel_core::{retention, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gotel=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = GotelConfig::load(&cli.config)?
        .apply_cli(&cli)
        .apply_env()?;
    tracing::info!(db_path = ?config.db_path, query_port = config.query_port, "starting gotel");

    let store = Arc::new(Store::open(&config.db_path).await?);
    let cancel = CancellationToken::new();

    let retention_handle = retention::spawn_retention_loop(
        store.clone(),
        config.cleanup_interval,
        config.retention,
        cancel.clone(),
    );

    let state = AppState {
        store: store.clone(),
        config: Arc::new(config.clone()),
        cancel: cancel.clone(),
    };

    let gateway = tokio::spawn(async move { gotel_core::serve(state, config.query_port).await });

    // Shutdown flow (spec §5): (1) signal cancellation, (2) let the HTTP
    // server drain via its own graceful-shutdown hook, (3) join both tasks,
    // (4) checkpoint, (5) close.
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    retention_handle.await?;
    gateway.await??;

    store.checkpoint().await?;

    // Both tasks above held the only other clones of this Arc and have now
    // exited, so this is expected to be the last reference.
    match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        Err(_store) => tracing::warn!("store still shared at shutdown, skipping close"),
    }
    tracing::info!("gotel stopped");
    Ok(())
}
