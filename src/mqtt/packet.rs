//! MQTT control packets, as far as the proxy needs to see into them.
//!
//! Only the fields the authorization handler consumes are extracted. The
//! frame's original bytes travel alongside the parsed view and are what gets
//! forwarded upstream, so nothing is ever re-encoded.

use bytes::{Buf, Bytes};

pub const CONNECT: u8 = 1;
pub const PUBLISH: u8 = 3;
pub const SUBSCRIBE: u8 = 8;
pub const UNSUBSCRIBE: u8 = 10;
pub const DISCONNECT: u8 = 14;

/// Protocol level byte of MQTT 5.0 CONNECT packets.
pub const PROTOCOL_LEVEL_V5: u8 = 5;

/// Largest value the remaining-length field can encode.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Default cap on a whole frame (fixed header included).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;

/// Error type for packet decoding.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("Malformed remaining length")]
    MalformedLength,

    #[error("Packet of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("Packet truncated")]
    Truncated,

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Reserved packet type {0}")]
    ReservedType(u8),

    #[error("Unsupported protocol {0:?}")]
    UnsupportedProtocol(String),

    #[error("Malformed packet: {0}")]
    Malformed(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A decoded frame: the parsed view plus the exact bytes received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub packet: Packet,
    pub raw: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Publish(Publish),
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    Disconnect,
    /// Any other control packet, by type number. Relayed untouched.
    Other(u8),
}

impl Packet {
    /// Short lowercase name, used for logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "connect",
            Packet::Publish(_) => "publish",
            Packet::Subscribe(_) => "subscribe",
            Packet::Unsubscribe(_) => "unsubscribe",
            Packet::Disconnect => "disconnect",
            Packet::Other(_) => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    /// `MQTT`, or `MQIsdp` for 3.1 clients.
    pub protocol_name: String,
    /// 3 = 3.1, 4 = 3.1.1, 5 = 5.0.
    pub protocol_level: u8,
    pub keep_alive: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub dup: bool,
    /// Present for QoS 1 and 2.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

/// Decode the remaining-length field at the start of `buf`.
///
/// Returns `(value, bytes_used)`, or `None` if `buf` ends before the field does.
pub fn decode_length(buf: &[u8]) -> Result<Option<(usize, usize)>, PacketError> {
    let mut value = 0usize;
    for i in 0..4 {
        let Some(&byte) = buf.get(i) else {
            return Ok(None);
        };
        value += ((byte & 0x7F) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Err(PacketError::MalformedLength)
}

/// Parse the body of a frame whose fixed header byte is `header`.
///
/// `protocol_level` is the level announced by the session's CONNECT; it
/// decides whether MQTT 5 property blocks are present.
pub fn parse(header: u8, body: Bytes, protocol_level: Option<u8>) -> Result<Packet, PacketError> {
    let packet_type = header >> 4;
    let flags = header & 0x0F;
    let v5 = protocol_level == Some(PROTOCOL_LEVEL_V5);
    let mut body = Reader(body);

    match packet_type {
        0 => Err(PacketError::ReservedType(0)),
        CONNECT => parse_connect(&mut body).map(Packet::Connect),
        PUBLISH => parse_publish(flags, &mut body, v5).map(Packet::Publish),
        SUBSCRIBE => {
            let packet_id = body.u16()?;
            if v5 {
                body.skip_properties()?;
            }
            let mut topics = Vec::new();
            while body.0.has_remaining() {
                topics.push(body.string()?);
                // Requested QoS / subscription options
                body.u8()?;
            }
            if topics.is_empty() {
                return Err(PacketError::Malformed("SUBSCRIBE without topic filters"));
            }
            Ok(Packet::Subscribe(Subscribe { packet_id, topics }))
        }
        UNSUBSCRIBE => {
            let packet_id = body.u16()?;
            if v5 {
                body.skip_properties()?;
            }
            let mut topics = Vec::new();
            while body.0.has_remaining() {
                topics.push(body.string()?);
            }
            if topics.is_empty() {
                return Err(PacketError::Malformed("UNSUBSCRIBE without topic filters"));
            }
            Ok(Packet::Unsubscribe(Unsubscribe { packet_id, topics }))
        }
        DISCONNECT => Ok(Packet::Disconnect),
        other => Ok(Packet::Other(other)),
    }
}

fn parse_connect(body: &mut Reader) -> Result<Connect, PacketError> {
    let protocol_name = body.string()?;
    if protocol_name != "MQTT" && protocol_name != "MQIsdp" {
        return Err(PacketError::UnsupportedProtocol(protocol_name));
    }
    let protocol_level = body.u8()?;
    let v5 = protocol_level == PROTOCOL_LEVEL_V5;
    let flags = body.u8()?;
    let keep_alive = body.u16()?;
    if v5 {
        body.skip_properties()?;
    }

    let client_id = body.string()?;

    if flags & 0x04 != 0 {
        if v5 {
            body.skip_properties()?;
        }
        // Will topic and payload are relayed but not inspected.
        body.string()?;
        body.binary()?;
    }

    let username = if flags & 0x80 != 0 {
        Some(body.string()?)
    } else {
        None
    };
    let password = if flags & 0x40 != 0 {
        Some(body.binary()?)
    } else {
        None
    };

    Ok(Connect {
        protocol_name,
        protocol_level,
        keep_alive,
        client_id,
        username,
        password,
    })
}

fn parse_publish(flags: u8, body: &mut Reader, v5: bool) -> Result<Publish, PacketError> {
    let qos = (flags >> 1) & 0x03;
    if qos == 3 {
        return Err(PacketError::Malformed("PUBLISH with QoS 3"));
    }
    let topic = body.string()?;
    let packet_id = if qos > 0 { Some(body.u16()?) } else { None };
    if v5 {
        body.skip_properties()?;
    }

    Ok(Publish {
        topic,
        qos,
        retain: flags & 0x01 != 0,
        dup: flags & 0x08 != 0,
        packet_id,
        payload: body.rest(),
    })
}

/// Bounds-checked cursor over a frame body.
struct Reader(Bytes);

impl Reader {
    fn need(&self, n: usize) -> Result<(), PacketError> {
        if self.0.remaining() < n {
            Err(PacketError::Truncated)
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> Result<u8, PacketError> {
        self.need(1)?;
        Ok(self.0.get_u8())
    }

    fn u16(&mut self) -> Result<u16, PacketError> {
        self.need(2)?;
        Ok(self.0.get_u16())
    }

    fn binary(&mut self) -> Result<Bytes, PacketError> {
        let len = self.u16()? as usize;
        self.need(len)?;
        Ok(self.0.split_to(len))
    }

    fn string(&mut self) -> Result<String, PacketError> {
        let raw = self.binary()?;
        String::from_utf8(raw.to_vec()).map_err(|_| PacketError::InvalidUtf8)
    }

    fn skip_properties(&mut self) -> Result<(), PacketError> {
        let (len, used) = decode_length(&self.0)?.ok_or(PacketError::Truncated)?;
        self.0.advance(used);
        self.need(len)?;
        self.0.advance(len);
        Ok(())
    }

    fn rest(&mut self) -> Bytes {
        std::mem::take(&mut self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_length_boundaries() {
        assert_eq!(decode_length(&[0x00]).unwrap(), Some((0, 1)));
        assert_eq!(decode_length(&[0x7F]).unwrap(), Some((127, 1)));
        assert_eq!(decode_length(&[0x80, 0x01]).unwrap(), Some((128, 2)));
        assert_eq!(
            decode_length(&[0xFF, 0xFF, 0xFF, 0x7F]).unwrap(),
            Some((MAX_REMAINING_LENGTH, 4))
        );
        assert_eq!(decode_length(&[0x80, 0x80]).unwrap(), None);
        assert!(matches!(
            decode_length(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]),
            Err(PacketError::MalformedLength)
        ));
    }

    #[test]
    fn reserved_type_is_rejected() {
        assert!(matches!(
            parse(0x00, Bytes::new(), None),
            Err(PacketError::ReservedType(0))
        ));
    }

    #[test]
    fn pingreq_is_other() {
        assert_eq!(parse(0xC0, Bytes::new(), Some(4)).unwrap(), Packet::Other(12));
    }

    #[test]
    fn truncated_string_is_reported() {
        // topic length says 5, only 2 bytes follow
        let body = Bytes::from_static(&[0x00, 0x05, b'a', b'b']);
        assert!(matches!(parse(0x30, body, Some(4)), Err(PacketError::Truncated)));
    }

    #[test]
    fn unknown_protocol_name_is_rejected() {
        let body = Bytes::from_static(&[0x00, 0x04, b'H', b'T', b'T', b'P', 0x04, 0x02, 0x00, 0x3C]);
        assert!(matches!(
            parse(0x10, body, None),
            Err(PacketError::UnsupportedProtocol(name)) if name == "HTTP"
        ));
    }
}
