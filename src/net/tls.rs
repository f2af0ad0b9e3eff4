//! TLS configuration and certificate loading.
//!
//! Turns the CA bundle, server certificate and server key paths into a
//! single `rustls::ServerConfig`. The result is shared read-only by every
//! TLS listener (WSS through axum-server, MQTTS through tokio-rustls).
//! Both listeners read the client certificate subject through
//! [`peer_subject`].

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection};

/// Error type for TLS material loading.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("{0} path is empty")]
    MissingPath(&'static str),

    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse PEM in {path:?}: {source}")]
    Pem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("No private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("Invalid CA certificate: {0}")]
    InvalidCa(#[source] rustls::Error),

    #[error("Failed to build client verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("Invalid certificate/key pair: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Load TLS configuration from a CA bundle, certificate and key files.
///
/// An empty `ca_certs` disables client certificate authentication; otherwise
/// every client must present a certificate signed by one of the bundle's CAs.
pub fn load_tls_config(
    ca_certs: impl AsRef<Path>,
    server_cert: impl AsRef<Path>,
    server_key: impl AsRef<Path>,
) -> Result<Arc<ServerConfig>, TlsError> {
    let server_cert = non_empty(server_cert.as_ref(), "server certificate")?;
    let server_key = non_empty(server_key.as_ref(), "server key")?;

    let certs = read_certs(server_cert)?;
    let key = read_key(server_key)?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;
    let ca_certs = ca_certs.as_ref();
    let config = if ca_certs.as_os_str().is_empty() {
        builder.with_no_client_auth().with_single_cert(certs, key)?
    } else {
        let mut roots = RootCertStore::empty();
        for ca in read_certs(ca_certs)? {
            roots.add(ca).map_err(TlsError::InvalidCa)?;
        }
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider).build()?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)?
    };

    tracing::debug!(
        server_cert = %server_cert.display(),
        client_auth = !ca_certs.as_os_str().is_empty(),
        "TLS configuration loaded"
    );

    Ok(Arc::new(config))
}

/// Subject DN of the leaf certificate the client presented, if any.
pub fn peer_subject(connection: &ServerConnection) -> Option<String> {
    certificate_subject(connection.peer_certificates()?.first()?)
}

fn certificate_subject(cert: &CertificateDer<'_>) -> Option<String> {
    match x509_parser::parse_x509_certificate(cert.as_ref()) {
        Ok((_, cert)) => Some(cert.subject().to_string()),
        Err(e) => {
            tracing::debug!(error = %e, "Could not parse client certificate");
            None
        }
    }
}

fn non_empty<'a>(path: &'a Path, what: &'static str) -> Result<&'a Path, TlsError> {
    if path.as_os_str().is_empty() {
        Err(TlsError::MissingPath(what))
    } else {
        Ok(path)
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}
