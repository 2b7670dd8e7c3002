//! meshgate-daemon: gateway and state store for one MeshCore radio.
//!
//! Single OS process on a Tokio runtime: owns the radio link, ingests
//! and persists every RF frame, mirrors conversation state to local
//! clients over JSON-RPC + push on a Unix socket, and sends outgoing
//! messages back through the radio.

mod acks;
mod commands;
mod config;
mod error;
mod events;
mod handlers;
mod keystore;
mod manager;
mod processor;
mod retry;
mod rpc;
mod state;
mod sync;
#[cfg(test)]
mod testutil;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::rpc::RpcServer;
use crate::state::GatewayState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.log_filter().parse()?),
        )
        .init();

    info!("MeshGate daemon starting");

    if let Some(dir) = config.database_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = meshgate_db::open(&config.database_path)?;
    info!("Database open at {:?}", config.database_path);

    let socket_path = config.socket_path();
    let gw = GatewayState::new(config, conn);

    // First connection attempt up front; the monitor keeps retrying if
    // the radio is not there yet.
    match manager::reconnect_and_setup(&gw).await {
        Ok(true) => info!("Radio connected"),
        Ok(false) => warn!("Radio not reachable yet, monitor will keep trying"),
        Err(e) => warn!("Initial radio setup failed ({e}), monitor will keep trying"),
    }
    manager::start_connection_monitor(&gw);

    let server = RpcServer::new(gw.clone(), socket_path.clone());
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    info!("Daemon shutting down gracefully");
    gw.tasks.abort_all();
    manager::disconnect(&gw);
    let _ = std::fs::remove_file(&socket_path);
    info!("Daemon stopped");
    Ok(())
}
