//! Attesta Server - WebAuthn relying party endpoints
//!
//! - POST /attestation/options - Creation options for a registration
//! - POST /attestation/result  - Verify an attestation and register the credential
//! - POST /assertion/options   - Request options for an authentication
//! - POST /assertion/result    - Verify an assertion
//! - GET  /health              - Trust store and ceremony summary

use std::{net::SocketAddr, time::Duration};

use attesta_core::{CeremonyStore, Fido2Config};
use attesta_server::{create_router_with_config, AppState, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let fido2 = Fido2Config::from_env();
    tracing::info!(rp_id = %fido2.rp_id, origin = %fido2.rp_origin, "Relying party configured");

    let state = AppState::from_config(fido2)?;

    // Periodic sweep of pending ceremonies past their ttl
    let ceremonies = state.ceremonies.clone();
    let interval = Duration::from_secs(config.cleanup_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = ceremonies.cleanup_expired().await;
            if removed > 0 {
                tracing::debug!(removed, "Expired ceremonies removed");
            }
        }
    });

    let app = create_router_with_config(&config, state);
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
