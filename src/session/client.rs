//! Connected device identity.

use std::fmt;
use std::net::SocketAddr;

use crate::mqtt::packet::Connect;

/// What the transport knows about a peer before any MQTT is parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    pub addr: Option<SocketAddr>,
    /// Subject of the verified client certificate (MQTTS with a CA bundle).
    pub cert_subject: Option<String>,
}

/// One connected device, for the lifetime of a single connection.
///
/// Built from the CONNECT packet once it has been parsed; owned by the
/// connection task and handed to the handler by reference.
#[derive(Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub username: String,
    pub password: Vec<u8>,
    pub cert_subject: Option<String>,
}

impl Client {
    pub fn new(id: impl Into<String>, username: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            password: password.into(),
            cert_subject: None,
        }
    }

    /// Build the client for a parsed CONNECT.
    ///
    /// MQTT allows an empty client id and leaves the choice to the broker;
    /// such clients get a generated `auto-<uuid>` id here so handlers can
    /// still tell them apart. The forwarded CONNECT is not modified.
    pub fn from_connect(connect: &Connect, peer: &PeerInfo) -> Self {
        let id = if connect.client_id.is_empty() {
            format!("auto-{}", uuid::Uuid::new_v4())
        } else {
            connect.client_id.clone()
        };

        Self {
            id,
            username: connect.username.clone().unwrap_or_default(),
            password: connect
                .password
                .as_ref()
                .map(|p| p.to_vec())
                .unwrap_or_default(),
            cert_subject: peer.cert_subject.clone(),
        }
    }

    pub fn with_cert_subject(mut self, subject: impl Into<String>) -> Self {
        self.cert_subject = Some(subject.into());
        self
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("cert_subject", &self.cert_subject)
            .finish()
    }
}
