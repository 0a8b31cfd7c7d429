mod server;

use anyhow::Result;
use tracing::info;

use ssenotify_core::{bootstrap::load_config, logging};

use server::NotifyServer;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load and validate configuration
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("SSE Notify server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Bind, then serve until SIGINT/SIGTERM
    let server = NotifyServer::bind(config).await?;
    server.start().await
}
