// ABOUTME: Entry point for the epochd binary.
// ABOUTME: Loads config, recovers every container registry from disk, and serves the HTTP API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use epochd_core::SnapshotManager;
use epochd_server::{AllocatorKind, AppState, EpochdConfig, create_router};
use epochd_store::StorageManager;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Data directory (overrides EPOCHD_HOME)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Address to bind (overrides EPOCHD_BIND)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Epoch allocator: clock or counter (overrides EPOCHD_ALLOCATOR)
    #[arg(long)]
    allocator: Option<AllocatorKind>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("epochd=debug,tower_http=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = EpochdConfig::from_env().context("invalid configuration")?;
    if let Some(home) = cli.home {
        config.home = home;
    }
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(allocator) = cli.allocator {
        config.allocator = allocator;
    }
    config.validate().context("invalid configuration")?;

    tracing::info!(
        "epochd starting: home={} allocator={:?} op_timeout={:?}",
        config.home.display(),
        config.allocator,
        config.op_timeout
    );

    let storage = StorageManager::new(config.home.clone())
        .with_context(|| format!("failed to open home {}", config.home.display()))?;
    let snapshots = SnapshotManager::with_timeout(config.allocator.build(), config.op_timeout);
    let recovered = storage
        .load_into(&snapshots)
        .await
        .context("failed to recover container registries")?;
    tracing::info!("recovered {} containers", recovered.len());

    let state = Arc::new(
        AppState::new(storage, snapshots)
            .with_checkpoints(config.checkpoint_every, config.checkpoints_kept),
    );
    for container in recovered {
        state.start_checkpointer(container).await;
    }

    let app = create_router(Arc::clone(&state), config.auth_token.clone());
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!("listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.stop_all_checkpointers().await;
    tracing::info!("epochd shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
