//! Campus room relay -- real-time fan-out for the portal's shared features.
//!
//! An axum WebSocket server backing the collaborative editor, the shared
//! whiteboard and video-call signaling. Clients join named rooms and every
//! update they send is forwarded to the other members of that room. All
//! state lives in this process; run a single instance.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin campus-relay
//!
//! # Run on custom address
//! cargo run --bin campus-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! RELAY_ADDR=127.0.0.1:8080 cargo run --bin campus-relay
//! ```

use std::sync::Arc;

use campus_relay::config::{RelayCliArgs, RelayConfig};
use campus_relay::relay::{self, RelayState};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        max_message_size = ?config.max_message_size,
        announce_departures = config.announce_departures,
        "starting campus relay server"
    );

    let state = Arc::new(RelayState::with_config(&config));

    match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, mut handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            tokio::select! {
                result = &mut handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "relay server task failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    state.close_all_connections();
                    // Give writer tasks a moment to flush their close frames.
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    handle.abort();
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
