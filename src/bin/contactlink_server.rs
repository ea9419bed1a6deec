//! contactlink gRPC Server
//!
//! A standalone server binary for running identity reconciliation over gRPC.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

use contactlink::storage::{open_database, PersistentConfig};
use contactlink::transport::ContactServiceImpl;
use contactlink::{ContactEngine, ContactRuntime, ContactRuntimeConfig, ContactStore};

/// Server command line arguments.
#[derive(Parser, Debug)]
#[command(name = "contactlink-server", version)]
#[command(about = "Contact identity reconciliation over gRPC")]
struct Args {
    /// Address to bind to
    #[arg(long, env = "CONTACTLINK_ADDR", default_value = "127.0.0.1:50051")]
    addr: SocketAddr,

    /// Port to listen on; overrides the port of --addr
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Data directory for persistent storage
    #[arg(short, long, env = "CONTACTLINK_DATA_DIR", default_value = "./contacts.db")]
    data_dir: PathBuf,

    /// Number of worker threads running identify requests
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Maximum queued requests before callers see RESOURCE_EXHAUSTED
    #[arg(long, default_value_t = 1024)]
    queue_capacity: usize,

    /// Per-request wait before DEADLINE_EXCEEDED, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    request_timeout_ms: u64,

    /// Skip fsync after each commit
    #[arg(long)]
    no_sync: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut addr = args.addr;
    if let Some(port) = args.port {
        addr.set_port(port);
    }

    info!(version = env!("CARGO_PKG_VERSION"), data_dir = %args.data_dir.display(), "opening contact store");

    // Holds an exclusive lock for the process lifetime.
    let store = open_database(
        &args.data_dir,
        Some(PersistentConfig {
            sync_on_write: !args.no_sync,
        }),
    )?;
    info!(contacts = store.len()?, "contact store ready");

    let engine = ContactEngine::new(Arc::new(store));
    let runtime = ContactRuntime::new(
        engine,
        ContactRuntimeConfig {
            workers: args.workers,
            queue_capacity: args.queue_capacity,
        },
    )?;

    let svc = ContactServiceImpl::new(Arc::new(runtime))
        .with_request_timeout(Duration::from_millis(args.request_timeout_ms))
        .into_server();

    info!(%addr, "starting gRPC server");

    Server::builder()
        .add_service(svc)
        .serve_with_shutdown(addr, async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    info!("shut down");
    Ok(())
}
