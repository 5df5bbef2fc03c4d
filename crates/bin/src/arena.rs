//! Arena - authoritative game server binary

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,server=debug")),
        )
        .init();

    info!("Arena server v{}", env!("CARGO_PKG_VERSION"));

    let config = server::Config::load("config.toml")?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!("  Tick rate: {} Hz", config.server.tick_rate);
    info!("  Border: {}x{}", config.border.width, config.border.height);
    info!("  Pellets: {}", config.pellet.target_count);
    info!("  Bots: {}", config.server.bots);

    server::run(config).await?;

    Ok(())
}
