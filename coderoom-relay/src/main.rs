//! Code room relay — WebSocket relay for collaborative code rooms.
//!
//! Configuration comes from `CODEROOM_*` environment variables, logging
//! from `RUST_LOG` (default `info`).

use log::{error, info};

use coderoom_collab::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    info!("Starting code room relay on {}...", config.bind_addr);
    if let Some(ttl) = config.idle_room_ttl {
        info!("Idle rooms evicted after {ttl:?}");
    }

    let server = RelayServer::new(config);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    if let Err(e) = server.run_until(shutdown).await {
        error!("Relay stopped: {e}");
        std::process::exit(1);
    }

    let stats = server.stats().await;
    info!(
        "Relay stopped after {} connections and {} events",
        stats.total_connections, stats.total_events
    );
}
