//! Per-connection relay: the state machine every listener runs.
//!
//! # Responsibilities
//! - Require CONNECT as the first packet and gate it through `auth_connect`
//! - Dial upstream only once the client is authorized
//! - Gate PUBLISH and SUBSCRIBE, forward everything else untouched
//! - Copy broker → client bytes without inspection
//! - Fire `disconnect` exactly once for every connected client
//!
//! # Design Decisions
//! - One frame at a time per client: auth, forward, notify, then next read
//! - The client loop stops only between frames, so a forwarded action is
//!   always followed by its notification
//! - A refused action is dropped; the connection stays up
//! - Session errors end the connection only, never the listener

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use crate::mqtt::codec::MqttCodec;
use crate::mqtt::packet::{Frame, Packet, PacketError};
use crate::observability::metrics;
use crate::session::client::{Client, PeerInfo};
use crate::session::handler::Handler;
use crate::session::transport::{ByteSink, ByteStream, Dial, Transport};

/// Error type for a single proxied session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Client transport error: {0}")]
    Client(#[source] std::io::Error),

    #[error("Upstream transport error: {0}")]
    Upstream(#[source] std::io::Error),

    #[error("Failed to dial upstream {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed packet: {0}")]
    Packet(#[from] PacketError),

    #[error("Protocol violation: {0}")]
    Protocol(&'static str),
}

/// Inbound framing state for one client.
struct Inbound {
    reader: ByteStream,
    codec: MqttCodec,
    buf: BytesMut,
}

impl Inbound {
    fn new(reader: ByteStream, max_packet_size: usize) -> Self {
        Self {
            reader,
            codec: MqttCodec::with_max_packet_size(max_packet_size),
            buf: BytesMut::new(),
        }
    }

    /// Next complete frame, or `None` once the client has closed.
    async fn next_frame(&mut self) -> Result<Option<Frame>, SessionError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }
            match self.reader.next().await {
                Some(chunk) => self
                    .buf
                    .extend_from_slice(&chunk.map_err(SessionError::Client)?),
                None => {
                    if !self.buf.is_empty() {
                        tracing::debug!(pending = self.buf.len(), "Client closed mid-frame");
                    }
                    return Ok(None);
                }
            }
        }
    }
}

/// Run one client connection to completion.
///
/// Returns `Ok(())` when either side closes normally or the client is
/// refused at connect time. Client frames larger than `max_packet_size`
/// end the session with [`PacketError::TooLarge`].
pub async fn serve(
    client: Transport,
    peer: PeerInfo,
    upstream: &dyn Dial,
    handler: &dyn Handler,
    max_packet_size: usize,
) -> Result<(), SessionError> {
    let Transport {
        reader: client_rx,
        writer: mut client_tx,
    } = client;
    let mut inbound = Inbound::new(client_rx, max_packet_size);

    let Some(first) = inbound.next_frame().await? else {
        tracing::debug!("Client closed before CONNECT");
        return Ok(());
    };
    let Packet::Connect(connect) = &first.packet else {
        return Err(SessionError::Protocol("first packet must be CONNECT"));
    };
    let client = Client::from_connect(connect, &peer);

    if let Err(e) = handler.auth_connect(&client).await {
        tracing::warn!(
            client_id = %client.id,
            username = %client.username,
            error = %e,
            "Connection refused"
        );
        metrics::auth_denied("connect");
        return Ok(());
    }

    let Transport {
        reader: mut upstream_rx,
        writer: mut upstream_tx,
    } = upstream.dial().await.map_err(|source| SessionError::Dial {
        target: upstream.target().to_string(),
        source,
    })?;

    forward(&mut upstream_tx, first, "connect").await?;
    handler.connect(&client).await;
    tracing::info!(client_id = %client.id, upstream = upstream.target(), "Client connected");

    let upstream_closed = CancellationToken::new();
    let result = {
        let client_to_upstream =
            relay_client(&client, &mut inbound, &mut upstream_tx, handler, &upstream_closed);
        tokio::pin!(client_to_upstream);

        let upstream_to_client = async {
            let result = async {
                while let Some(chunk) = upstream_rx.next().await {
                    let chunk = chunk.map_err(SessionError::Upstream)?;
                    client_tx.send(chunk).await.map_err(SessionError::Client)?;
                }
                tracing::debug!(client_id = %client.id, "Upstream closed");
                Ok::<(), SessionError>(())
            }
            .await;
            upstream_closed.cancel();
            result
        };

        tokio::select! {
            r = &mut client_to_upstream => r,
            r = upstream_to_client => {
                // Let the frame in flight finish its notification.
                let pending = client_to_upstream.await;
                r.and(pending)
            }
        }
    };

    let _ = upstream_tx.close().await;
    let _ = client_tx.close().await;

    handler.disconnect(&client).await;
    tracing::info!(client_id = %client.id, "Client disconnected");

    result
}

async fn relay_client(
    client: &Client,
    inbound: &mut Inbound,
    upstream: &mut ByteSink,
    handler: &dyn Handler,
    upstream_closed: &CancellationToken,
) -> Result<(), SessionError> {
    loop {
        let next = tokio::select! {
            biased;
            _ = upstream_closed.cancelled() => break,
            next = inbound.next_frame() => next?,
        };
        let Some(frame) = next else {
            tracing::debug!(client_id = %client.id, "Client closed");
            break;
        };

        match &frame.packet {
            Packet::Publish(publish) => {
                if let Err(e) = handler
                    .auth_publish(client, &publish.topic, &publish.payload)
                    .await
                {
                    tracing::warn!(client_id = %client.id, topic = %publish.topic, error = %e, "Publish refused");
                    metrics::auth_denied("publish");
                    continue;
                }
                let publish = publish.clone();
                forward(upstream, frame, "publish").await?;
                handler.publish(client, &publish.topic, &publish.payload).await;
            }
            Packet::Subscribe(subscribe) => {
                if let Err(e) = handler.auth_subscribe(client, &subscribe.topics).await {
                    tracing::warn!(
                        client_id = %client.id,
                        topics = %subscribe.topics.join(","),
                        error = %e,
                        "Subscribe refused"
                    );
                    metrics::auth_denied("subscribe");
                    continue;
                }
                let topics = subscribe.topics.clone();
                forward(upstream, frame, "subscribe").await?;
                handler.subscribe(client, &topics).await;
            }
            Packet::Unsubscribe(unsubscribe) => {
                let topics = unsubscribe.topics.clone();
                forward(upstream, frame, "unsubscribe").await?;
                handler.unsubscribe(client, &topics).await;
            }
            Packet::Connect(_) => {
                return Err(SessionError::Protocol("second CONNECT on an open session"));
            }
            other => {
                let name = other.name();
                forward(upstream, frame, name).await?;
            }
        }
    }
    Ok(())
}

async fn forward(upstream: &mut ByteSink, frame: Frame, name: &'static str) -> Result<(), SessionError> {
    upstream
        .send(frame.raw)
        .await
        .map_err(SessionError::Upstream)?;
    metrics::forwarded(name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::fixtures;
    use crate::session::handler::AuthError;
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        AuthConnect(String),
        Connect(String),
        AuthPublish(String, String, Vec<u8>),
        Publish(String, String, Vec<u8>),
        AuthSubscribe(String, Vec<String>),
        Subscribe(String, Vec<String>),
        Unsubscribe(String, Vec<String>),
        Disconnect(String),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
        refuse_connect: bool,
        refused_prefix: Option<&'static str>,
        publish_delay: Option<Duration>,
    }

    impl Recorder {
        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn refuses(&self, topic: &str) -> bool {
            self.refused_prefix.is_some_and(|p| topic.starts_with(p))
        }
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn auth_connect(&self, client: &Client) -> Result<(), AuthError> {
            self.push(Event::AuthConnect(client.id.clone()));
            if self.refuse_connect {
                return Err(AuthError::denied("bad credentials"));
            }
            Ok(())
        }

        async fn auth_publish(&self, client: &Client, topic: &str, payload: &[u8]) -> Result<(), AuthError> {
            self.push(Event::AuthPublish(client.id.clone(), topic.into(), payload.to_vec()));
            if self.refuses(topic) {
                return Err(AuthError::denied("topic not allowed"));
            }
            Ok(())
        }

        async fn auth_subscribe(&self, client: &Client, topics: &[String]) -> Result<(), AuthError> {
            self.push(Event::AuthSubscribe(client.id.clone(), topics.to_vec()));
            if topics.iter().any(|t| self.refuses(t)) {
                return Err(AuthError::denied("topic not allowed"));
            }
            Ok(())
        }

        async fn connect(&self, client: &Client) {
            self.push(Event::Connect(client.id.clone()));
        }

        async fn publish(&self, client: &Client, topic: &str, payload: &[u8]) {
            if let Some(delay) = self.publish_delay {
                tokio::time::sleep(delay).await;
            }
            self.push(Event::Publish(client.id.clone(), topic.into(), payload.to_vec()));
        }

        async fn subscribe(&self, client: &Client, topics: &[String]) {
            self.push(Event::Subscribe(client.id.clone(), topics.to_vec()));
        }

        async fn unsubscribe(&self, client: &Client, topics: &[String]) {
            self.push(Event::Unsubscribe(client.id.clone(), topics.to_vec()));
        }

        async fn disconnect(&self, client: &Client) {
            self.push(Event::Disconnect(client.id.clone()));
        }
    }

    /// Hands out one pre-built in-memory upstream.
    struct PipeDial {
        upstream: Mutex<Option<DuplexStream>>,
        dialed: AtomicUsize,
    }

    impl PipeDial {
        fn new(upstream: DuplexStream) -> Self {
            Self {
                upstream: Mutex::new(Some(upstream)),
                dialed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Dial for PipeDial {
        async fn dial(&self) -> io::Result<Transport> {
            self.dialed.fetch_add(1, Ordering::SeqCst);
            let io = self
                .upstream
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "already dialed"))?;
            Ok(Transport::from_io(io))
        }

        fn target(&self) -> &str {
            "pipe"
        }
    }

    struct Harness {
        device: DuplexStream,
        broker: DuplexStream,
        handler: Arc<Recorder>,
        dial: Arc<PipeDial>,
        session: tokio::task::JoinHandle<Result<(), SessionError>>,
    }

    const TEST_MAX_PACKET_SIZE: usize = 1024;

    fn start(handler: Recorder) -> Harness {
        let (client_io, device) = duplex(4096);
        let (upstream_io, broker) = duplex(4096);
        let handler = Arc::new(handler);
        let dial = Arc::new(PipeDial::new(upstream_io));

        let session = {
            let handler = handler.clone();
            let dial = dial.clone();
            tokio::spawn(async move {
                serve(
                    Transport::from_io(client_io),
                    PeerInfo::default(),
                    &*dial,
                    &*handler,
                    TEST_MAX_PACKET_SIZE,
                )
                .await
            })
        };

        Harness {
            device,
            broker,
            handler,
            dial,
            session,
        }
    }

    async fn expect_upstream(broker: &mut DuplexStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(5), broker.read_exact(&mut buf))
            .await
            .expect("upstream read timed out")
            .unwrap();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn full_lifecycle_is_ordered() {
        let mut h = start(Recorder::default());

        let connect = fixtures::connect("dev-1", Some("u"), Some(b"p"));
        h.device.write_all(&connect).await.unwrap();
        expect_upstream(&mut h.broker, &connect).await;

        let publish = fixtures::publish("sensors/temp", b"21.5");
        h.device.write_all(&publish).await.unwrap();
        expect_upstream(&mut h.broker, &publish).await;

        let subscribe = fixtures::subscribe(1, &["cmd/#"]);
        h.device.write_all(&subscribe).await.unwrap();
        expect_upstream(&mut h.broker, &subscribe).await;

        let unsubscribe = fixtures::unsubscribe(2, &["cmd/#"]);
        h.device.write_all(&unsubscribe).await.unwrap();
        expect_upstream(&mut h.broker, &unsubscribe).await;

        drop(h.device);
        h.session.await.unwrap().unwrap();

        let id = "dev-1".to_string();
        assert_eq!(
            h.handler.events(),
            vec![
                Event::AuthConnect(id.clone()),
                Event::Connect(id.clone()),
                Event::AuthPublish(id.clone(), "sensors/temp".into(), b"21.5".to_vec()),
                Event::Publish(id.clone(), "sensors/temp".into(), b"21.5".to_vec()),
                Event::AuthSubscribe(id.clone(), vec!["cmd/#".into()]),
                Event::Subscribe(id.clone(), vec!["cmd/#".into()]),
                Event::Unsubscribe(id.clone(), vec!["cmd/#".into()]),
                Event::Disconnect(id),
            ]
        );
    }

    #[tokio::test]
    async fn refused_connect_never_dials_or_notifies() {
        let mut h = start(Recorder {
            refuse_connect: true,
            ..Default::default()
        });

        h.device
            .write_all(&fixtures::connect("dev-1", Some("u"), Some(b"wrong")))
            .await
            .unwrap();
        h.session.await.unwrap().unwrap();

        assert_eq!(h.dial.dialed.load(Ordering::SeqCst), 0);
        assert_eq!(h.handler.events(), vec![Event::AuthConnect("dev-1".into())]);

        // The proxy hung up on the device.
        let mut buf = [0u8; 1];
        assert_eq!(h.device.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refused_publish_is_dropped_and_session_continues() {
        let mut h = start(Recorder {
            refused_prefix: Some("secret/"),
            ..Default::default()
        });

        let connect = fixtures::connect("dev-1", None, None);
        h.device.write_all(&connect).await.unwrap();
        expect_upstream(&mut h.broker, &connect).await;

        h.device
            .write_all(&fixtures::publish("secret/plans", b"x"))
            .await
            .unwrap();
        let allowed = fixtures::publish("public/news", b"y");
        h.device.write_all(&allowed).await.unwrap();

        // The first bytes upstream sees after CONNECT are the allowed publish.
        expect_upstream(&mut h.broker, &allowed).await;

        drop(h.device);
        h.session.await.unwrap().unwrap();

        let events = h.handler.events();
        assert!(!events
            .iter()
            .any(|e| matches!(e, Event::Publish(_, topic, _) if topic == "secret/plans")));
        assert!(events.contains(&Event::Publish("dev-1".into(), "public/news".into(), b"y".to_vec())));
        assert_eq!(events.last(), Some(&Event::Disconnect("dev-1".into())));
    }

    #[tokio::test]
    async fn subscribe_is_authorized_as_a_whole() {
        let mut h = start(Recorder {
            refused_prefix: Some("secret/"),
            ..Default::default()
        });

        let connect = fixtures::connect("dev-1", None, None);
        h.device.write_all(&connect).await.unwrap();
        expect_upstream(&mut h.broker, &connect).await;

        h.device
            .write_all(&fixtures::subscribe(1, &["public/#", "secret/#"]))
            .await
            .unwrap();
        let ping = fixtures::pingreq();
        h.device.write_all(&ping).await.unwrap();
        expect_upstream(&mut h.broker, &ping).await;

        drop(h.device);
        h.session.await.unwrap().unwrap();

        assert!(!h
            .handler
            .events()
            .iter()
            .any(|e| matches!(e, Event::Subscribe(..))));
    }

    #[tokio::test]
    async fn broker_bytes_reach_the_device() {
        let mut h = start(Recorder::default());

        let connect = fixtures::connect("dev-1", None, None);
        h.device.write_all(&connect).await.unwrap();
        expect_upstream(&mut h.broker, &connect).await;

        let connack = [0x20, 0x02, 0x00, 0x00];
        h.broker.write_all(&connack).await.unwrap();

        let mut buf = [0u8; 4];
        h.device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, connack);
    }

    #[tokio::test]
    async fn upstream_close_still_notifies_disconnect_once() {
        let mut h = start(Recorder::default());

        let connect = fixtures::connect("dev-1", None, None);
        h.device.write_all(&connect).await.unwrap();
        expect_upstream(&mut h.broker, &connect).await;

        drop(h.broker);
        h.session.await.unwrap().unwrap();

        let disconnects = h
            .handler
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Disconnect(_)))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn malformed_packet_after_connect_ends_session_with_disconnect() {
        let mut h = start(Recorder::default());

        let connect = fixtures::connect("dev-1", None, None);
        h.device.write_all(&connect).await.unwrap();
        expect_upstream(&mut h.broker, &connect).await;

        h.device
            .write_all(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01])
            .await
            .unwrap();
        let err = h.session.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Packet(PacketError::MalformedLength)));
        assert_eq!(h.handler.events().last(), Some(&Event::Disconnect("dev-1".into())));
    }

    #[tokio::test]
    async fn first_packet_must_be_connect() {
        let mut h = start(Recorder::default());

        h.device
            .write_all(&fixtures::publish("a", b"b"))
            .await
            .unwrap();
        let err = h.session.await.unwrap().unwrap_err();

        assert!(matches!(err, SessionError::Protocol(_)));
        assert!(h.handler.events().is_empty());
        assert_eq!(h.dial.dialed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_connect_is_a_protocol_violation() {
        let mut h = start(Recorder::default());

        let connect = fixtures::connect("dev-1", None, None);
        h.device.write_all(&connect).await.unwrap();
        expect_upstream(&mut h.broker, &connect).await;
        h.device.write_all(&connect).await.unwrap();

        let err = h.session.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
        assert_eq!(
            h.handler.events(),
            vec![
                Event::AuthConnect("dev-1".into()),
                Event::Connect("dev-1".into()),
                Event::Disconnect("dev-1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn connect_and_publish_in_one_write() {
        let mut h = start(Recorder::default());

        let mut bytes = fixtures::connect("dev-1", None, None);
        let publish = fixtures::publish("sensors/temp", b"21.5");
        bytes.extend_from_slice(&publish);
        h.device.write_all(&bytes).await.unwrap();

        expect_upstream(&mut h.broker, &bytes).await;
        drop(h.device);
        h.session.await.unwrap().unwrap();

        let publishes = h
            .handler
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Publish(..)))
            .count();
        assert_eq!(publishes, 1);
    }

    #[tokio::test]
    async fn upstream_close_waits_for_pending_notification() {
        let mut h = start(Recorder {
            publish_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });

        let connect = fixtures::connect("dev-1", None, None);
        h.device.write_all(&connect).await.unwrap();
        expect_upstream(&mut h.broker, &connect).await;

        let publish = fixtures::publish("sensors/temp", b"21.5");
        h.device.write_all(&publish).await.unwrap();
        expect_upstream(&mut h.broker, &publish).await;

        // The broker goes away while the publish notification is still running.
        drop(h.broker);
        h.session.await.unwrap().unwrap();

        let id = "dev-1".to_string();
        assert_eq!(
            h.handler.events(),
            vec![
                Event::AuthConnect(id.clone()),
                Event::Connect(id.clone()),
                Event::AuthPublish(id.clone(), "sensors/temp".into(), b"21.5".to_vec()),
                Event::Publish(id.clone(), "sensors/temp".into(), b"21.5".to_vec()),
                Event::Disconnect(id),
            ]
        );
    }

    #[tokio::test]
    async fn oversized_connect_is_rejected_before_auth() {
        let mut h = start(Recorder::default());

        h.device
            .write_all(&[0x10, 0xFF, 0xFF, 0xFF, 0x7F])
            .await
            .unwrap();
        let err = h.session.await.unwrap().unwrap_err();

        assert!(matches!(
            err,
            SessionError::Packet(PacketError::TooLarge { max: TEST_MAX_PACKET_SIZE, .. })
        ));
        assert!(h.handler.events().is_empty());
        assert_eq!(h.dial.dialed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_publish_ends_session_without_forwarding() {
        let mut h = start(Recorder::default());

        let connect = fixtures::connect("dev-1", None, None);
        h.device.write_all(&connect).await.unwrap();
        expect_upstream(&mut h.broker, &connect).await;

        let big = fixtures::publish("bulk", &vec![0u8; TEST_MAX_PACKET_SIZE]);
        h.device.write_all(&big[..8]).await.unwrap();

        let err = h.session.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Packet(PacketError::TooLarge { .. })));

        let events = h.handler.events();
        assert!(!events.iter().any(|e| matches!(e, Event::AuthPublish(..))));
        assert_eq!(events.last(), Some(&Event::Disconnect("dev-1".into())));
    }
}
