//! Schema-sync server.

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Schema-sync server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = server::Config::load()?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!(
        "  Tracking: enabled={} udp port {}",
        config.tracking.enabled, config.tracking.port
    );
    if !config.serial.devices.is_empty() {
        info!("  Serial devices: {:?}", config.serial.devices);
    }

    server::run(config).await?;

    Ok(())
}
