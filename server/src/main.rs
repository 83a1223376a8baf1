// Quillpad relay - entry point. Bootstrap and CLI only; the relay itself
// lives in the library modules.

pub use quillpad_server::*;

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use quillpad_core::{
    RelayConfig,
    db::{PostgresRelayStore, create_pool},
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quillpad_server::{
    cache::{RedisSnapshotCache, SnapshotCache},
    router,
    state::build_state,
    sweeper,
};

const DATABASE_MAX_CONNECTIONS: u32 = 16;

#[derive(Parser, Debug)]
#[command(author, version, about = "Quillpad realtime relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the relay server
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_loaded = dotenv().is_ok();
    init_tracing();
    if env_loaded {
        info!("loaded environment variables from .env");
    }

    let cli = Cli::parse();
    let config = RelayConfig::load()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_serve(config).await,
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .try_init();
}

async fn run_serve(config: RelayConfig) -> anyhow::Result<()> {
    let Some(database_url) = config.database_url.as_deref() else {
        bail!("DATABASE_URL must be set");
    };

    let pool = create_pool(database_url, DATABASE_MAX_CONNECTIONS).await?;
    let store = Arc::new(PostgresRelayStore::new(pool));

    let cache: Option<Arc<dyn SnapshotCache>> = match config.redis_url.as_deref() {
        Some(url) => match RedisSnapshotCache::connect(url).await {
            Ok(cache) => {
                info!("snapshot cache connected");
                Some(Arc::new(cache))
            }
            Err(err) => {
                warn!(error = %err, "snapshot cache unavailable; running durable-only");
                None
            }
        },
        None => {
            info!("no REDIS_URL configured; running durable-only");
            None
        }
    };

    let state = build_state(&config.jwt_secret, config.timings, store, cache);
    let sweeper_handle = sweeper::spawn_sweeper(state.clone());

    let app = router::build_router(state.clone());
    let listener = TcpListener::bind(config.bind_address)
        .await
        .context("failed to bind socket")?;
    let actual_addr = listener
        .local_addr()
        .context("failed to read local address")?;

    info!("listening on {actual_addr}");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(?err, "server terminated with error");
    }

    sweeper_handle.abort();

    // Complete owed persists so the durable tier holds the last merged
    // state across the restart.
    state.registry.flush_all(&state.snapshots).await;
    info!("pending persists flushed; shutting down");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal(kind: tokio::signal::unix::SignalKind) {
    let mut stream =
        tokio::signal::unix::signal(kind).expect("signal handler registration cannot fail");
    stream.recv().await;
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::SignalKind;

        tokio::select! {
            _ = wait_for_signal(SignalKind::terminate()) => {}
            _ = wait_for_signal(SignalKind::interrupt()) => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
