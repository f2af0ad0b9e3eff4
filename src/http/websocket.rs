//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Complete the upgrade handshake with the device (`mqtt` subprotocol)
//! - Establish the WebSocket connection to the upstream target
//! - Adapt both sockets to byte transports for the session relay
//!
//! # Data Flow
//! ```text
//! Device ←── binary frames ──→ Proxy (relay) ←── binary frames ──→ Upstream
//! ```
//!
//! # Design Decisions
//! - Only binary frames carry MQTT; text frames are ignored
//! - The upstream socket is opened after `auth_connect` succeeds
//! - Ping/pong is answered by each socket layer, not relayed
//! - Upgrades beyond the listener's connection cap are refused with 503

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use bytes::Bytes;
use futures_util::{future, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::Instrument;

use crate::http::acceptor::ClientCertificate;
use crate::net::ConnectionTracker;
use crate::session::{self, Dial, Handler, PeerInfo, Transport};

/// Subprotocols offered to devices, in preference order.
pub const SUBPROTOCOLS: [&str; 2] = ["mqtt", "mqttv3.1"];

/// Dials the upstream WebSocket endpoint (`ws://` or `wss://`).
#[derive(Debug, Clone)]
pub struct WsDial {
    url: String,
}

impl WsDial {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Dial for WsDial {
    async fn dial(&self) -> io::Result<Transport> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(io::Error::other)?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("mqtt"));

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(io::Error::other)?;
        Ok(upstream_transport(socket))
    }

    fn target(&self) -> &str {
        &self.url
    }
}

fn upstream_transport<S>(socket: WebSocketStream<S>) -> Transport
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = socket.split();
    let reader = stream
        .filter_map(|message| async move {
            match message {
                Ok(UpstreamMessage::Binary(data)) => Some(Ok(data)),
                Ok(_) => None,
                Err(e) => Some(Err(io::Error::other(e))),
            }
        })
        .boxed();
    let writer = sink
        .sink_map_err(io::Error::other)
        .with(|data: Bytes| future::ready(Ok::<_, io::Error>(UpstreamMessage::Binary(data))));
    Transport::new(reader, Box::pin(writer))
}

/// Adapt an upgraded device socket to a byte transport.
pub fn client_transport(socket: WebSocket) -> Transport {
    let (sink, stream) = socket.split();
    let reader = stream
        .filter_map(|message| async move {
            match message {
                Ok(Message::Binary(data)) => Some(Ok(data)),
                Ok(_) => None,
                Err(e) => Some(Err(io::Error::other(e))),
            }
        })
        .boxed();
    let writer = sink
        .sink_map_err(io::Error::other)
        .with(|data: Bytes| future::ready(Ok::<_, io::Error>(Message::Binary(data))));
    Transport::new(reader, Box::pin(writer))
}

/// State shared by every upgrade on one WS listener.
#[derive(Clone)]
pub struct WsState {
    pub dial: Arc<WsDial>,
    pub handler: Arc<dyn Handler>,
    pub tracker: ConnectionTracker,
    pub limit: Arc<Semaphore>,
    pub max_packet_size: usize,
}

/// Upgrade handler mounted at the configured path.
///
/// The peer address and certificate subject are present when the router is
/// served with connect info and behind [`PeerCertAcceptor`](crate::http::acceptor::PeerCertAcceptor).
pub async fn upgrade(
    State(state): State<WsState>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    certificate: Option<Extension<ClientCertificate>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Ok(permit) = state.limit.clone().try_acquire_owned() else {
        tracing::warn!(
            listener = state.tracker.listener(),
            "Connection limit reached, refusing upgrade"
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let peer = PeerInfo {
        addr: connect_info.map(|Extension(ConnectInfo(addr))| addr),
        cert_subject: certificate.and_then(|Extension(ClientCertificate(subject))| subject),
    };
    ws.protocols(SUBPROTOCOLS)
        .on_upgrade(move |socket| bridge(socket, peer, state, permit))
}

async fn bridge(socket: WebSocket, peer: PeerInfo, state: WsState, permit: OwnedSemaphorePermit) {
    let guard = state.tracker.track();
    let span = tracing::info_span!(
        "connection",
        id = %guard.id(),
        listener = state.tracker.listener(),
        peer = ?peer.addr
    );

    async move {
        let transport = client_transport(socket);
        match session::serve(transport, peer, &*state.dial, &*state.handler, state.max_packet_size).await {
            Ok(()) => tracing::debug!("Session closed"),
            Err(e) => tracing::warn!(error = %e, "Session ended with error"),
        }
        drop(guard);
        drop(permit);
    }
    .instrument(span)
    .await
}
