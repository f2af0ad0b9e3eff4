//! Frame splitting for an MQTT byte stream.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::mqtt::packet::{self, Frame, Packet, PacketError, DEFAULT_MAX_PACKET_SIZE};

/// Splits a client byte stream into MQTT frames.
///
/// The codec remembers the protocol level announced by CONNECT so later
/// packets of an MQTT 5 session are parsed past their property blocks.
/// A frame whose declared size exceeds `max_packet_size` is rejected as soon
/// as its header is readable; no space is set aside for a declared body, so
/// the buffer only grows with bytes that actually arrived.
#[derive(Debug)]
pub struct MqttCodec {
    protocol_level: Option<u8>,
    max_packet_size: usize,
}

impl Default for MqttCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttCodec {
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            protocol_level: None,
            max_packet_size,
        }
    }

    /// Protocol level seen in this stream's CONNECT, if any.
    pub fn protocol_level(&self) -> Option<u8> {
        self.protocol_level
    }
}

impl Decoder for MqttCodec {
    type Item = Frame;
    type Error = PacketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, PacketError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let Some((remaining, length_bytes)) = packet::decode_length(&src[1..])? else {
            return Ok(None);
        };

        let frame_len = 1 + length_bytes + remaining;
        if frame_len > self.max_packet_size {
            return Err(PacketError::TooLarge {
                size: frame_len,
                max: self.max_packet_size,
            });
        }
        if src.len() < frame_len {
            return Ok(None);
        }

        let raw = src.split_to(frame_len).freeze();
        let packet = packet::parse(raw[0], raw.slice(1 + length_bytes..), self.protocol_level)?;
        if let Packet::Connect(connect) = &packet {
            self.protocol_level = Some(connect.protocol_level);
        }

        Ok(Some(Frame { packet, raw }))
    }
}
