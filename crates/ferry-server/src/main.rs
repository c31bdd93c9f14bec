use std::sync::Arc;

use tracing::{info, warn};

use ferry_server::{DirCatalog, Server, ServerConfig};

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_server=debug,ferry_transfer=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if !config.share_dir.is_dir() {
        warn!("share directory {} does not exist, creating it", config.share_dir.display());
        std::fs::create_dir_all(&config.share_dir)?;
    }
    info!("serving files from {}", config.share_dir.display());
    info!(
        "ack timeout {:?}, max retries {}",
        config.ack_timeout,
        if config.max_retries == 0 { "unbounded".to_string() } else { config.max_retries.to_string() }
    );

    let catalog = Arc::new(DirCatalog::new(config.share_dir.clone()));
    let server = Arc::new(Server::bind(config, catalog)?);

    let signalled = server.clone();
    ctrlc::set_handler(move || {
        info!("Received Ctrl+C or SIGTERM, shutting down...");
        signalled.shutdown();
    })?;

    server.run()?;
    info!("Server shut down gracefully");
    Ok(())
}
