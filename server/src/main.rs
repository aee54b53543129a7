use clap::Parser;
use env_logger::Env;
use gather_server::config::Config;
use gather_server::hub::Hub;
use gather_server::network::Server;
use gather_server::router::Router;
use gather_server::store::{MemoryStore, SqliteStore, Store};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// Parses the configuration, opens storage and serves clients until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    config.validate()?;

    let store: Arc<dyn Store> = match &config.database {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => {
            warn!("No database configured, players will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let rng = match config.seed {
        Some(seed) => {
            info!("Using spawn seed {}", seed);
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_entropy(),
    };

    let hub = Arc::new(Hub::new(config.queue_capacity));
    let router = Arc::new(Router::new(Arc::clone(&hub), store, rng));
    let server = Server::bind(&config.bind_address(), router).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    hub.shutdown().await;
    Ok(())
}
