//! Role Rendezvous Store Service
//!
//! This binary provides the shared key-value store workers use to discover
//! each other at startup.
//!
//! # Usage
//!
//! ```bash
//! # Start the store with default settings
//! roles-rendezvous
//!
//! # Start on a custom port
//! roles-rendezvous --port 29500
//! ```
//!
//! Workers point `ROLES_RENDEZVOUS_ADDRESS` at `<host>:<port>`.

mod service;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roles_core::rendezvous::protocol::MAX_FRAME_LEN;
use roles_core::InMemoryStore;
use service::StoreService;

/// Role Rendezvous Store
#[derive(Parser, Debug)]
#[command(name = "roles-rendezvous")]
#[command(about = "Rendezvous store for role-based worker discovery")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "29400")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0")]
    address: String,

    /// Longest request frame accepted, in bytes
    #[arg(long, default_value_t = MAX_FRAME_LEN)]
    max_frame_len: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr: SocketAddr = format!("{}:{}", args.address, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Starting rendezvous store");
    tracing::info!("Listening on {}", listener.local_addr()?);

    let service = Arc::new(StoreService::new(InMemoryStore::new()).with_max_frame_len(args.max_frame_len));
    service
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
