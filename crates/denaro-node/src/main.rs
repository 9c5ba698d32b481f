//! Entry point. Exit codes: 0 normal, 1 configuration error,
//! 2 unrecoverable storage error, 3 identity load failure.

use anyhow::Result;
use denaro_node::{config::NodeConfig, context::NodeContext, http, tasks};
use denaro_peers::NodeIdentity;
use denaro_storage::{ChainStore, PostgresStore, StoreOp};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG: i32 = 1;
const EXIT_STORAGE: i32 = 2;
const EXIT_IDENTITY: i32 = 3;

fn init_tracing(config: &NodeConfig) {
    let filter = EnvFilter::try_new(&config.log.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.log.console_highlighting);
    // Timestamps come from the hosting environment when LOG_DATE_FORMAT=none.
    let hide_time = config.log.date_format.as_deref() == Some("none");
    match (config.log.format.as_str(), hide_time) {
        ("compact", true) => builder.compact().without_time().init(),
        ("compact", false) => builder.compact().init(),
        (_, true) => builder.without_time().init(),
        (_, false) => builder.init(),
    }
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_CONFIG;
        }
    };
    init_tracing(&config);
    info!(version = denaro_types::constants::NODE_VERSION, "starting denaro node");

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!(error = %e, "data directory not writable");
        return EXIT_CONFIG;
    }
    let identity = match NodeIdentity::load_or_generate(&config.identity_path()) {
        Ok(identity) => identity,
        Err(e) => {
            error!(error = %e, "could not load node identity");
            return EXIT_IDENTITY;
        }
    };
    info!(node_id = identity.node_id(), "identity ready");

    let store = match PostgresStore::connect(config.database.clone()).await {
        Ok(store) => Arc::new(store) as Arc<dyn ChainStore>,
        Err(e) => {
            error!(error = %e, "storage unavailable");
            return EXIT_STORAGE;
        }
    };
    // The pool is rebuilt through gossip; stale entries from the previous
    // run would only shadow the network view.
    if let Err(e) = store.apply(vec![StoreOp::ClearPending]).await {
        error!(error = %e, "could not clear pending pool");
        return EXIT_STORAGE;
    }

    let ctx = NodeContext::build(config, store, identity);
    if let Err(e) = serve(ctx).await {
        error!(error = %e, "node terminated abnormally");
        return EXIT_STORAGE;
    }
    0
}

async fn serve(ctx: Arc<NodeContext>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(ctx.sync.clone().run(shutdown_rx.clone()));
    tokio::spawn(tasks::mempool_maintenance(ctx.clone(), shutdown_rx.clone()));
    tokio::spawn(tasks::health_ticker(ctx.clone(), shutdown_rx.clone()));

    let app = http::router(ctx.clone());
    let addr = ctx.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, height = ctx.chain.height().await.unwrap_or(0), "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, draining");
        let _ = shutdown_tx.send(true);
    })
    .await?;

    info!("shutdown complete");
    Ok(())
}
