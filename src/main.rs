//! Process entry point: load configuration, restore the last snapshot,
//! spawn the background snapshot/sweep loops, and serve the HTTP surface.

use std::path::Path;

use clap::Parser;
use genbroker::broker::Broker;
use genbroker::config::Config;
use genbroker::registry::Registry;
use genbroker::{http, persistence};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    let data_dir = config.data_dir.clone();

    let users = persistence::load(Path::new(&data_dir)).await?;
    let mut registry = Registry::new();
    registry.load_users(users);

    let broker = Broker::new(config, registry);

    spawn_snapshot_loop(broker.clone());
    spawn_sweep_loop(broker.clone());

    let app = http::router(broker.clone());
    let listener = tokio::net::TcpListener::bind(&broker.config.bind_addr).await?;
    info!(addr = %broker.config.bind_addr, "genbroker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down, writing final snapshot");
    if let Err(e) = broker.snapshot().await {
        error!("final snapshot write failed: {e}");
    }

    Ok(())
}

fn spawn_snapshot_loop(broker: std::sync::Arc<Broker>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(broker.config.snapshot_interval());
        loop {
            tick.tick().await;
            if let Err(e) = broker.snapshot().await {
                error!("snapshot write failed: {e}");
            }
        }
    });
}

fn spawn_sweep_loop(broker: std::sync::Arc<Broker>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(broker.config.sweep_interval());
        loop {
            tick.tick().await;
            broker.sweep();
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
