use anyhow::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use turnstile::{config::Config, server};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!("🚦 Turnstile v{}", turnstile::VERSION);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("✓ Configuration loaded");
    info!("  HTTP: {}", config.server.bind);
    if config.rate_limit.enabled {
        info!(
            "  Rate limit: {} requests/minute, buckets idle {}s are reclaimed every {}s",
            config.rate_limit.requests_per_minute,
            config.rate_limit.bucket_ttl_secs,
            config.rate_limit.sweep_interval_secs
        );
    } else {
        info!("  Rate limit: disabled");
    }

    server::run(config).await?;

    Ok(())
}
