//! Tank Duo Server
//!
//! Pairs hosts with guests and relays their traffic until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tank_duo::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!("Tank Duo Server v{}", VERSION);
    info!("Keepalive: {:?}, outbound queue: {}", config.keepalive, config.outbound_queue);

    let server = Arc::new(GameServer::new(config));
    let listener = server.bind().await?;

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.serve(listener).await?;

    // Give connections a moment to flush their shutdown notices.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
