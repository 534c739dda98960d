mod analysis;
mod config;
mod errors;
mod llm_client;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, ProviderKind};
use crate::llm_client::build_http_client;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Curveball API v{}", env!("CARGO_PKG_VERSION"));

    // Provider readiness is only reported here; requests re-check it.
    for kind in ProviderKind::ALL {
        let provider = config.provider(kind);
        if provider.is_ready() {
            info!(
                "Provider {kind} ready (streaming: {})",
                provider.streaming
            );
        } else {
            warn!("Provider {kind} is missing a credential or model");
        }
    }
    info!("Default provider: {}", config.default_provider);

    // Initialize the shared HTTP client
    let http = build_http_client(config.request_timeout_secs)?;
    info!(
        "HTTP client initialized (timeout: {}s)",
        config.request_timeout_secs
    );

    let state = AppState::new(config.clone(), http);
    info!(
        "Session store ready (capacity: {}, idle ttl: {}s)",
        config.session_capacity, config.session_ttl_secs
    );

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
