//! Crash Engine server binary
//!
//! Runs the round engine and serves the HTTP request interface and the
//! WebSocket observer stream.

use clap::Parser;
use crash_engine::api::{ApiServer, AppState};
use crash_engine::config::{ConfigLoader, EngineConfig};
use crash_engine::engine::Engine;
use crash_engine::metrics::EngineMetrics;
use crash_engine::store::{BalanceStore, MemoryBalanceStore, MemoryRoundStore, RocksStore, RoundStore};
use crash_engine::EngineResult;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crash-engine")]
#[command(about = "Provably fair crash-game round engine", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// API server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// API server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Database directory (overrides config)
    #[arg(long)]
    db_path: Option<String>,

    /// Keep balances and rounds in memory only
    #[arg(long)]
    ephemeral: bool,
}

fn load_config(args: &Args) -> EngineResult<EngineConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(host) = &args.host {
        config.api.host = host.clone();
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(db_path) = &args.db_path {
        config.storage.data_directory = db_path.clone();
    }
    Ok(config)
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config.logging.filter);

    info!("Starting crash engine v{}", env!("CARGO_PKG_VERSION"));
    info!(
        waiting_ms = config.game.waiting_ms,
        cooldown_ms = config.game.cooldown_ms,
        tick_ms = config.game.tick_ms,
        growth_base = config.game.growth_base,
        "Game configuration"
    );

    let balances: Arc<dyn BalanceStore>;
    let rounds: Arc<dyn RoundStore>;
    if args.ephemeral {
        warn!("Running with in-memory stores; balances and history are lost on exit");
        balances = Arc::new(MemoryBalanceStore::new());
        rounds = Arc::new(MemoryRoundStore::new());
    } else {
        info!("Opening database: {}", config.storage.data_directory);
        let store = Arc::new(RocksStore::open(&config.storage)?);
        balances = store.clone();
        rounds = store;
    }

    let metrics = Arc::new(EngineMetrics::new());
    let runtime = Engine::start(config.game.clone(), balances.clone(), rounds, metrics.clone());

    let server = ApiServer::new(
        config.api.clone(),
        AppState {
            engine: runtime.handle.clone(),
            broadcaster: runtime.broadcaster.clone(),
            balances,
            metrics,
            instant_bust_modulus: config.game.instant_bust_modulus,
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );

    // Stop the engine first so open observer streams close and the server can drain
    let (stopped_tx, stopped_rx) = oneshot::channel();
    let engine_stop = tokio::spawn(async move {
        shutdown_signal().await;
        let result = runtime.shutdown().await;
        let _ = stopped_tx.send(());
        result
    });

    server
        .run(async {
            let _ = stopped_rx.await;
        })
        .await?;

    engine_stop.await??;
    info!("Crash engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
