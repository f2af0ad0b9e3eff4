//! Byte transports the relay runs over.
//!
//! Raw TCP, TLS streams and WebSocket connections all end up as a boxed
//! stream of inbound chunks plus a boxed sink for outbound chunks, so one
//! relay implementation serves every listener.

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::{Sink, StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;
pub type ByteSink = Pin<Box<dyn Sink<Bytes, Error = io::Error> + Send>>;

/// Both halves of a connection.
pub struct Transport {
    pub reader: ByteStream,
    pub writer: ByteSink,
}

impl Transport {
    pub fn new(reader: ByteStream, writer: ByteSink) -> Self {
        Self { reader, writer }
    }

    /// Wrap any async byte stream (TCP, TLS, in-memory duplex).
    pub fn from_io<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            reader: FramedRead::new(read_half, BytesCodec::new())
                .map_ok(BytesMut::freeze)
                .boxed(),
            writer: Box::pin(FramedWrite::new(write_half, BytesCodec::new())),
        }
    }
}

/// Opens the upstream side of a session.
///
/// Called only after `auth_connect` succeeded, so refused clients never cause
/// upstream connections.
#[async_trait]
pub trait Dial: Send + Sync {
    async fn dial(&self) -> io::Result<Transport>;

    /// Human-readable target, for logs and errors.
    fn target(&self) -> &str;
}
