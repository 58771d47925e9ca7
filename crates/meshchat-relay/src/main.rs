//! # meshchat-relay
//!
//! Signaling relay for meshchat.
//!
//! This binary provides:
//! - a **directory** of logged-in participant names (one connection per name)
//! - **presence broadcasts** when a participant logs out or disconnects
//! - **offer/answer forwarding** between two named participants, with the
//!   negotiation payload passed through untouched
//! - a small HTTP surface (`/health`, `/info`) next to the WebSocket endpoint
//!
//! Chat messages and files never pass through the relay; peers exchange them
//! over direct links once negotiation completes.

mod api;
mod config;
mod directory;
mod error;
mod relay;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,meshchat_relay=debug")),
        )
        .init();

    info!("Starting meshchat relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = RelayConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Spawn the relay task (owns the directory)
    // -----------------------------------------------------------------------
    let relay = relay::spawn_relay();
    let listen_addr = config.listen_addr;
    let app_state = AppState::new(relay, config);

    // -----------------------------------------------------------------------
    // 4. Run the WebSocket / HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, listen_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Signaling server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
