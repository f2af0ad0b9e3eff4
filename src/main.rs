//! MQTT / MQTT-over-WebSocket proxy
//!
//! Sits between devices and an MQTT broker, giving a pluggable handler the
//! chance to authorize and observe every session.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌───────────────────────────────────────────────────┐
//!                  │                    MQTT PROXY                      │
//!                  │                                                    │
//!   Device (WS)    │  ┌──────────┐                                      │
//!   ───────────────┼─▶│   http   │──┐                                   │
//!                  │  │ ws / wss │  │   ┌──────────┐    ┌──────────┐    │   Broker
//!                  │  └──────────┘  ├──▶│ session  │───▶│ upstream │────┼──▶ (WS or TCP)
//!   Device (TCP)   │  ┌──────────┐  │   │  relay   │◀───│   dial   │◀───┼───
//!   ───────────────┼─▶│   mqtt   │──┘   └────┬─────┘    └──────────┘    │
//!                  │  │mqtt/mqtts│           │                          │
//!                  │  └──────────┘           ▼                          │
//!                  │                   ┌──────────────┐                 │
//!                  │                   │   handler    │                 │
//!                  │                   │ auth + notify│                 │
//!                  │                   └──────────────┘                 │
//!                  │                                                    │
//!                  │  config · lifecycle · observability · net (tls)    │
//!                  └───────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one listener pair runs: WS + MQTT in plaintext mode, WSS + MQTTS
//! when `MPROXY_CLIENT_TLS` is set. The first listener failure or SIGINT ends
//! the process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use mqtt_proxy::config;
use mqtt_proxy::lifecycle::Orchestrator;
use mqtt_proxy::observability::{logging, metrics};
use mqtt_proxy::session::LogHandler;

#[derive(Parser, Debug)]
#[command(name = "mqtt-proxy", version, about = "MQTT and MQTT-over-WebSocket proxy")]
struct Cli {
    /// Optional TOML config file; MPROXY_* variables override its values
    #[arg(short, long, env = "MPROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Upstream wss:// dials go through tokio-tungstenite, which uses the
    // process-wide provider.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = config::load(cli.config.as_deref(), |key| std::env::var(key).ok())?;
    logging::init(&config.log.level)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mqtt-proxy starting");
    tracing::info!(
        client_tls = config.tls.client_tls,
        ws_target = %config.ws_target_url(),
        mqtt_target = %config.mqtt_target(),
        max_connections = config.limits.max_connections,
        max_packet_size = config.limits.max_packet_size,
        "Configuration loaded"
    );

    if let Some(address) = &config.observability.metrics_address {
        match address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %address,
                "Failed to parse metrics address"
            ),
        }
    }

    let termination = Orchestrator::new(config, Arc::new(LogHandler)).run().await?;
    tracing::error!(cause = %termination, "mqtt proxy terminated");

    Ok(())
}
