//! Standalone TCP store server
//!
//! Hosts the rendezvous key space outside of rank 0. Point every rank's
//! `MASTER_ADDR`/`MASTER_PORT` at it and create the stores as clients.

use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xccl_core::StoreConfig;
use xccl_store::TcpStoreServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xccl_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse listen address from args or use default
    let addr: SocketAddr = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => SocketAddr::from(([0, 0, 0, 0], 29500)),
    };

    let max_message_size = StoreConfig::default().max_message_size;
    let mut server = TcpStoreServer::bind(addr, max_message_size).await?;
    tracing::info!("Serving rendezvous store on {}", server.local_addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down store server");

    server.shutdown();
    server.wait().await;

    Ok(())
}
