//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use mqtt_proxy::session::{AuthError, Client, Handler};

pub const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

// ---------------------------------------------------------------------------
// Packet builders
// ---------------------------------------------------------------------------

pub fn frame(header: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![header];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
    out.extend_from_slice(body);
    out
}

fn string(s: &str) -> Vec<u8> {
    let mut out = (s.len() as u16).to_be_bytes().to_vec();
    out.extend_from_slice(s.as_bytes());
    out
}

pub fn connect(client_id: &str, username: &str, password: &[u8]) -> Vec<u8> {
    let mut body = string("MQTT");
    body.extend_from_slice(&[0x04, 0xC2, 0x00, 0x3C]);
    body.extend(string(client_id));
    body.extend(string(username));
    body.extend_from_slice(&(password.len() as u16).to_be_bytes());
    body.extend_from_slice(password);
    frame(0x10, &body)
}

pub fn publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = string(topic);
    body.extend_from_slice(payload);
    frame(0x30, &body)
}

pub fn subscribe(packet_id: u16, topics: &[&str]) -> Vec<u8> {
    let mut body = packet_id.to_be_bytes().to_vec();
    for topic in topics {
        body.extend(string(topic));
        body.push(0x00);
    }
    frame(0x82, &body)
}

pub fn disconnect() -> Vec<u8> {
    vec![0xE0, 0x00]
}

// ---------------------------------------------------------------------------
// Recording handler
// ---------------------------------------------------------------------------

/// Records every handler call as a short string, e.g. `publish dev-1 sensors/temp 21.5`.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<String>>,
    subjects: Mutex<Vec<Option<String>>>,
    denied_topic_prefix: Option<String>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuses publishes to topics starting with `prefix`.
    pub fn denying(prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            denied_topic_prefix: Some(prefix.to_string()),
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Certificate subjects seen by `auth_connect`, in call order.
    pub fn subjects(&self) -> Vec<Option<String>> {
        self.subjects.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn auth_connect(&self, client: &Client) -> Result<(), AuthError> {
        self.subjects.lock().unwrap().push(client.cert_subject.clone());
        self.record(format!("auth_connect {} {}", client.id, client.username));
        Ok(())
    }

    async fn auth_publish(&self, client: &Client, topic: &str, payload: &[u8]) -> Result<(), AuthError> {
        self.record(format!(
            "auth_publish {} {} {}",
            client.id,
            topic,
            String::from_utf8_lossy(payload)
        ));
        match &self.denied_topic_prefix {
            Some(prefix) if topic.starts_with(prefix.as_str()) => Err(AuthError::denied("topic not allowed")),
            _ => Ok(()),
        }
    }

    async fn auth_subscribe(&self, client: &Client, topics: &[String]) -> Result<(), AuthError> {
        self.record(format!("auth_subscribe {} {}", client.id, topics.join(",")));
        Ok(())
    }

    async fn connect(&self, client: &Client) {
        self.record(format!("connect {}", client.id));
    }

    async fn publish(&self, client: &Client, topic: &str, payload: &[u8]) {
        self.record(format!(
            "publish {} {} {}",
            client.id,
            topic,
            String::from_utf8_lossy(payload)
        ));
    }

    async fn subscribe(&self, client: &Client, topics: &[String]) {
        self.record(format!("subscribe {} {}", client.id, topics.join(",")));
    }

    async fn unsubscribe(&self, client: &Client, topics: &[String]) {
        self.record(format!("unsubscribe {} {}", client.id, topics.join(",")));
    }

    async fn disconnect(&self, client: &Client) {
        self.record(format!("disconnect {}", client.id));
    }
}

// ---------------------------------------------------------------------------
// Mock brokers
// ---------------------------------------------------------------------------

/// Bytes a mock broker received, across all of its connections.
pub type Received = Arc<Mutex<Vec<u8>>>;

/// Start a TCP broker that answers the first chunk of each connection with
/// CONNACK and records everything it receives.
pub async fn start_tcp_broker() -> (SocketAddr, Received) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received: Received = Arc::default();
    let sink = received.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let sink = sink.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let mut acked = false;
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            sink.lock().unwrap().extend_from_slice(&buf[..n]);
                            if !acked {
                                acked = true;
                                let _ = socket.write_all(&CONNACK).await;
                            }
                        }
                    }
                }
            });
        }
    });

    (addr, received)
}

/// Start a WebSocket broker that accepts the `mqtt` subprotocol, answers the
/// first binary message with CONNACK and records every binary payload.
pub async fn start_ws_broker() -> (SocketAddr, Received) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received: Received = Arc::default();
    let sink = received.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let sink = sink.clone();
            tokio::spawn(async move {
                let callback = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                    if req.headers().contains_key("sec-websocket-protocol") {
                        resp.headers_mut()
                            .insert("sec-websocket-protocol", HeaderValue::from_static("mqtt"));
                    }
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    return;
                };

                let mut acked = false;
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Binary(data) = message {
                        sink.lock().unwrap().extend_from_slice(&data);
                        if !acked {
                            acked = true;
                            let _ = ws.send(Message::Binary(CONNACK.to_vec().into())).await;
                        }
                    }
                }
            });
        }
    });

    (addr, received)
}

// ---------------------------------------------------------------------------
// TLS fixtures
// ---------------------------------------------------------------------------

/// Path of a PEM file under `tests/fixtures`.
pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Client config trusting the fixture CA and presenting the `dev-1` certificate.
pub fn client_tls_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs("ca.crt") {
        roots.add(cert).unwrap();
    }
    let chain = read_certs("client.crt");
    let pem = std::fs::read(fixture("client.key")).unwrap();
    let key = rustls_pemfile::private_key(&mut pem.as_slice()).unwrap().unwrap();

    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .unwrap();
    Arc::new(config)
}

fn read_certs(name: &str) -> Vec<CertificateDer<'static>> {
    let pem = std::fs::read(fixture(name)).unwrap();
    rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<_, _>>()
        .unwrap()
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// True if `haystack` contains `needle` as a contiguous run.
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
