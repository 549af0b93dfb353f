//! LarkRelay - Main entry point.

use anyhow::Result;
use larkrelay_common::config::Config;
use larkrelay_common::logging::init_logging;
use larkrelay_server::start_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration with environment overrides
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("LarkRelay v{}", env!("CARGO_PKG_VERSION"));

    // Start the HTTP server
    start_server(&config).await
}
