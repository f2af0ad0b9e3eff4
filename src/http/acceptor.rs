//! TLS acceptor that exposes the device certificate to the upgrade handler.
//!
//! axum-server terminates TLS before any request is seen, so the verified
//! client certificate is read once per connection here and attached to every
//! request on that connection as a [`ClientCertificate`] extension.

use std::io;

use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tower_http::add_extension::AddExtension;

use crate::net::peer_subject;

/// Subject DN of the certificate the device presented, if any.
#[derive(Debug, Clone, Default)]
pub struct ClientCertificate(pub Option<String>);

/// Wraps [`RustlsAcceptor`] and tags each connection's service with the
/// peer certificate subject.
#[derive(Clone)]
pub struct PeerCertAcceptor {
    inner: RustlsAcceptor,
}

impl PeerCertAcceptor {
    pub fn new(config: RustlsConfig) -> Self {
        Self {
            inner: RustlsAcceptor::new(config),
        }
    }
}

impl<I, S> Accept<I, S> for PeerCertAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
    RustlsAcceptor: Accept<I, S, Stream = TlsStream<I>, Service = S>,
    <RustlsAcceptor as Accept<I, S>>::Future: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = AddExtension<S, ClientCertificate>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let handshake = self.inner.accept(stream, service);
        Box::pin(async move {
            let (stream, service) = handshake.await?;
            let subject = peer_subject(stream.get_ref().1);
            tracing::trace!(subject = ?subject, "TLS handshake complete");
            Ok((stream, AddExtension::new(service, ClientCertificate(subject))))
        })
    }
}
