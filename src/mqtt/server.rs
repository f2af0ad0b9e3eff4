//! MQTT/MQTTS listener.
//!
//! # Responsibilities
//! - Bind the raw MQTT port (plain TCP or TLS)
//! - Accept connections under the connection limit
//! - Terminate TLS and extract the client certificate subject
//! - Run the session relay against the upstream broker per connection
//!
//! # Design Decisions
//! - A failed TLS handshake drops that connection only
//! - `listen`/`listen_tls` return only when the accept loop fails

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::mqtt::packet::DEFAULT_MAX_PACKET_SIZE;
use crate::net::{peer_subject, ConnectionTracker, Listener, ListenerError};
use crate::session::{self, Dial, Handler, PeerInfo, Transport};

/// Dials the upstream broker over plain TCP.
#[derive(Debug, Clone)]
pub struct TcpDial {
    target: String,
}

impl TcpDial {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

#[async_trait]
impl Dial for TcpDial {
    async fn dial(&self) -> io::Result<Transport> {
        let stream = TcpStream::connect(&self.target).await?;
        stream.set_nodelay(true)?;
        Ok(Transport::from_io(stream))
    }

    fn target(&self) -> &str {
        &self.target
    }
}

/// Proxies raw MQTT connections to a single upstream broker.
pub struct MqttProxy {
    address: String,
    dial: Arc<TcpDial>,
    handler: Arc<dyn Handler>,
    max_connections: usize,
    max_packet_size: usize,
}

impl MqttProxy {
    /// `address` is the local `host:port` to bind, `target` the broker's.
    pub fn new(address: impl Into<String>, target: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            address: address.into(),
            dial: Arc::new(TcpDial::new(target)),
            handler,
            max_connections: 10_000,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Largest frame accepted from a device before its session is closed.
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Bind and serve plain MQTT.
    pub async fn listen(self) -> Result<(), ListenerError> {
        let listener = Listener::bind(&self.address, self.max_connections).await?;
        self.serve(listener).await
    }

    /// Bind and serve MQTT over TLS.
    pub async fn listen_tls(self, acceptor: TlsAcceptor) -> Result<(), ListenerError> {
        let listener = Listener::bind(&self.address, self.max_connections).await?;
        self.serve_tls(listener, acceptor).await
    }

    /// Serve plain MQTT on an already bound listener.
    pub async fn serve(self, listener: Listener) -> Result<(), ListenerError> {
        self.accept_loop(listener, None).await
    }

    /// Serve MQTT over TLS on an already bound listener.
    pub async fn serve_tls(self, listener: Listener, acceptor: TlsAcceptor) -> Result<(), ListenerError> {
        self.accept_loop(listener, Some(acceptor)).await
    }

    async fn accept_loop(self, listener: Listener, tls: Option<TlsAcceptor>) -> Result<(), ListenerError> {
        let label = if tls.is_some() { "mqtts" } else { "mqtt" };
        let tracker = ConnectionTracker::new(label);

        tracing::info!(
            listener = label,
            address = %self.address,
            upstream = self.dial.target(),
            "MQTT proxy accepting connections"
        );

        loop {
            let (stream, peer_addr, permit) = listener.accept().await?;
            let guard = tracker.track();
            let span = tracing::info_span!(
                "connection",
                id = %guard.id(),
                listener = label,
                peer = %peer_addr
            );

            let dial = self.dial.clone();
            let handler = self.handler.clone();
            let tls = tls.clone();
            let max_packet_size = self.max_packet_size;

            tokio::spawn(
                async move {
                    let _permit = permit;
                    let _guard = guard;
                    let _ = stream.set_nodelay(true);

                    let mut peer = PeerInfo {
                        addr: Some(peer_addr),
                        cert_subject: None,
                    };
                    let transport = match tls {
                        None => Transport::from_io(stream),
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                peer.cert_subject = peer_subject(tls_stream.get_ref().1);
                                Transport::from_io(tls_stream)
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "TLS handshake failed");
                                return;
                            }
                        },
                    };

                    match session::serve(transport, peer, &*dial, &*handler, max_packet_size).await {
                        Ok(()) => tracing::debug!("Session closed"),
                        Err(e) => tracing::warn!(error = %e, "Session ended with error"),
                    }
                }
                .instrument(span),
            );
        }
    }
}
