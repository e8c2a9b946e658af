//! Illustrative HTTP binding for the Clavum core. Wires the in-memory
//! storage implementations to an axum router implementing spec.md §6's
//! endpoint contract. Provisioning tenants, agents, and phones (the
//! pairing handshake) is out of scope here; a real deployment plugs its
//! own storage backend into the traits `clavum-core` defines and seeds
//! them out of band.

mod auth;
mod error;
mod routes;
mod state;

use clavum_core::Config;
use tower_http::cors::CorsLayer;

use state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,clavum_server=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    config.validate()?;

    let state = AppState::new(&config);
    let app = routes::router(state).layer(CorsLayer::permissive());

    let addr = std::env::var("CLAVUM_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:4433".to_string());
    tracing::info!(%addr, "clavum-server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
