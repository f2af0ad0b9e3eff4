//! WebSocket listener setup.
//!
//! # Responsibilities
//! - Create the Axum Router exposing the upgrade path
//! - Wire up request tracing
//! - Bind plain HTTP (WS) or rustls-terminated HTTPS (WSS)
//! - Cap concurrent WebSocket sessions per listener
//! - Report the serve loop ending as a listener failure

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

use crate::http::acceptor::PeerCertAcceptor;
use crate::http::websocket::{upgrade, WsDial, WsState};
use crate::mqtt::packet::DEFAULT_MAX_PACKET_SIZE;
use crate::net::{ConnectionTracker, ListenerError};
use crate::session::{Dial, Handler};

/// Proxies MQTT-over-WebSocket connections to a single upstream endpoint.
pub struct WsProxy {
    path: String,
    dial: Arc<WsDial>,
    handler: Arc<dyn Handler>,
    max_connections: usize,
    max_packet_size: usize,
}

impl WsProxy {
    /// `target_url` is the upstream endpoint (e.g. `ws://broker:8888/mqtt`),
    /// `path` the local upgrade path.
    pub fn new(target_url: impl Into<String>, path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            path: path.into(),
            dial: Arc::new(WsDial::new(target_url)),
            handler,
            max_connections: 10_000,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Upgrades beyond this many live sessions are answered with 503.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Largest frame accepted from a device before its session is closed.
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// The upgrade route, for mounting into another Axum application.
    pub fn router(&self) -> Router {
        self.build_router("ws")
    }

    fn build_router(&self, label: &'static str) -> Router {
        let state = WsState {
            dial: self.dial.clone(),
            handler: self.handler.clone(),
            tracker: ConnectionTracker::new(label),
            limit: Arc::new(Semaphore::new(self.max_connections)),
            max_packet_size: self.max_packet_size,
        };

        Router::new()
            .route(&self.path, get(upgrade))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind `host:port` and serve plain WebSocket upgrades.
    pub async fn listen(self, host: &str, port: u16) -> Result<(), ListenerError> {
        let listener = bind(host, port).await?;
        self.serve(listener).await
    }

    /// Bind `host:port` and serve WebSocket upgrades over TLS.
    pub async fn listen_tls(self, host: &str, port: u16, tls: Arc<ServerConfig>) -> Result<(), ListenerError> {
        let listener = bind(host, port).await?;
        self.serve_tls(listener, tls).await
    }

    /// Serve plain WebSocket upgrades on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Serve)?;
        tracing::info!(
            address = %addr,
            path = %self.path,
            upstream = self.dial.target(),
            "WebSocket proxy starting"
        );

        let app = self.build_router("ws");
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(ListenerError::Serve)?;
        Err(ListenerError::Stopped)
    }

    /// Serve WebSocket upgrades over TLS on an already bound listener.
    pub async fn serve_tls(self, listener: TcpListener, tls: Arc<ServerConfig>) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Serve)?;
        tracing::info!(
            address = %addr,
            path = %self.path,
            upstream = self.dial.target(),
            "Encrypted WebSocket proxy starting"
        );

        let listener = listener.into_std().map_err(ListenerError::Serve)?;
        let app = self.build_router("wss");
        axum_server::from_tcp(listener)
            .acceptor(PeerCertAcceptor::new(RustlsConfig::from_config(tls)))
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(ListenerError::Serve)?;
        Err(ListenerError::Stopped)
    }
}

async fn bind(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let address = format!("{host}:{port}");
    TcpListener::bind(&address)
        .await
        .map_err(|source| ListenerError::Bind { address, source })
}
