pub mod http;

use crate::auth::{Authenticator, StaticTokenAuthenticator};
use crate::config::Config;
use crate::rate_limit::{RateLimiter, SystemClock};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Run the HTTP server until Ctrl-C / SIGTERM, then stop background work
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.clone(),
        Arc::new(SystemClock),
    ));
    limiter.start_reclamation();

    let authenticator = StaticTokenAuthenticator::new(config.auth.tokens.clone());
    if authenticator.is_empty() {
        warn!("No auth tokens configured; every caller is limited by address");
    }
    let authenticator: Arc<dyn Authenticator> = Arc::new(authenticator);

    let state = http::AppState {
        config: config.clone(),
        limiter: limiter.clone(),
    };
    let app = http::build_app(state, authenticator, http::api_routes());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("✓ HTTP server listening on {}", config.server.bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down");
    limiter.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
