//! Wireless packet with typed accessors.
//!
//! Represents a complete data packet with header and payload.
//! Uses `bytes::Bytes` for cheap payload sharing between queues.
//!
//! # Example
//!
//! ```
//! use lorahome_dongle::protocol::{MessageType, Packet, PacketHeader};
//! use bytes::Bytes;
//!
//! let header = PacketHeader::new(0x00, 0x05, MessageType::GatewayMessageAck, 0x1234, 1, 5);
//! let packet = Packet::new(header, Bytes::from_static(b"hello"));
//!
//! let frame = packet.serialize();
//! assert_eq!(frame.len(), 8 + 5 + 2);
//! assert_eq!(Packet::parse(&frame).unwrap(), packet);
//! ```

use bytes::Bytes;

use super::crc::{append_crc, crc16, validate};
use super::wire_format::{
    MessageType, PacketHeader, ACK_FRAME_SIZE, FOOTER_SIZE, HEADER_SIZE, MAX_FRAME_SIZE,
    MAX_PAYLOAD_SIZE, MIN_FRAME_SIZE, NODE_ID_GATEWAY,
};
use crate::error::{DongleError, Result};

/// A complete wireless data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Decoded header.
    pub header: PacketHeader,
    /// Payload bytes (opaque, usually a small JSON document).
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet from header and payload.
    pub fn new(header: PacketHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Build a packet, setting the payload size field from the payload.
    pub fn with_payload(
        emitter: u8,
        recipient: u8,
        message_type: MessageType,
        network_id: u16,
        counter: u16,
        payload: &[u8],
    ) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(DongleError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let header = PacketHeader::new(
            emitter,
            recipient,
            message_type,
            network_id,
            counter,
            payload.len() as u8,
        );
        Ok(Self::new(header, Bytes::copy_from_slice(payload)))
    }

    /// Parse a packet handed over by the host: header + payload, no CRC.
    ///
    /// Bytes beyond the declared payload are ignored.
    pub fn from_unsigned(buf: &[u8]) -> Result<Self> {
        let header = PacketHeader::decode(buf).ok_or_else(|| {
            DongleError::Protocol(format!(
                "Packet of {} bytes is shorter than the {}-byte header",
                buf.len(),
                HEADER_SIZE
            ))
        })?;
        header.validate()?;
        let end = HEADER_SIZE + header.payload_size as usize;
        if buf.len() < end {
            return Err(DongleError::Protocol(format!(
                "Payload size field {} but only {} payload bytes present",
                header.payload_size,
                buf.len() - HEADER_SIZE
            )));
        }
        Ok(Self::new(header, Bytes::copy_from_slice(&buf[HEADER_SIZE..end])))
    }

    /// Parse a complete frame (header + payload + CRC).
    ///
    /// Checks the length bounds, the CRC, and that the payload size field
    /// matches the bytes present.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < MIN_FRAME_SIZE || frame.len() > MAX_FRAME_SIZE {
            return Err(DongleError::Protocol(format!(
                "Frame length {} outside [{}, {}]",
                frame.len(),
                MIN_FRAME_SIZE,
                MAX_FRAME_SIZE
            )));
        }
        if !validate(frame) {
            return Err(DongleError::Protocol("CRC mismatch".to_string()));
        }
        let packet = Self::from_unsigned(&frame[..frame.len() - FOOTER_SIZE])?;
        if packet.header.frame_size() != frame.len() {
            return Err(DongleError::Protocol(format!(
                "Payload size field {} does not match frame length {}",
                packet.header.payload_size,
                frame.len()
            )));
        }
        Ok(packet)
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Known message type, if any.
    #[inline]
    pub fn kind(&self) -> Option<MessageType> {
        self.header.kind()
    }

    /// Header followed by the payload, without CRC.
    ///
    /// This is the form exchanged with the host over the serial link.
    pub fn to_unsigned(&self) -> Vec<u8> {
        let payload = self.declared_payload();
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(payload);
        buf
    }

    /// Serialize to a complete frame: header, payload, CRC over both.
    ///
    /// Only `payload_size` payload bytes are emitted.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.header.frame_size());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(self.declared_payload());
        append_crc(&mut buf);
        buf
    }

    fn declared_payload(&self) -> &[u8] {
        let declared = (self.header.payload_size as usize).min(self.payload.len());
        &self.payload[..declared]
    }
}

/// Serialize a header-only frame (payload size forced to 0).
pub fn serialize_ack(header: &PacketHeader) -> [u8; ACK_FRAME_SIZE] {
    let mut header = *header;
    header.payload_size = 0;
    let mut buf = [0u8; ACK_FRAME_SIZE];
    header.encode_into(&mut buf[..HEADER_SIZE]);
    let crc = crc16(&buf[..HEADER_SIZE]);
    buf[HEADER_SIZE..].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// Build the ack the gateway sends back for a node message.
///
/// # Example
///
/// ```
/// use lorahome_dongle::protocol::{gateway_ack, PacketHeader, MessageType};
///
/// let frame = gateway_ack(0x1234, 0x05, 42);
/// let header = PacketHeader::decode(&frame).unwrap();
/// assert_eq!(header.kind(), Some(MessageType::GatewayAck));
/// assert_eq!(header.recipient, 0x05);
/// assert_eq!(header.counter, 42);
/// ```
pub fn gateway_ack(network_id: u16, recipient: u8, counter: u16) -> [u8; ACK_FRAME_SIZE] {
    let header = PacketHeader::new(
        NODE_ID_GATEWAY,
        recipient,
        MessageType::GatewayAck,
        network_id,
        counter,
        0,
    );
    serialize_ack(&header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::validate;

    fn node_packet(payload: &[u8]) -> Packet {
        Packet::with_payload(0x07, NODE_ID_GATEWAY, MessageType::NodeMessageAck, 0xBEEF, 9, payload)
            .unwrap()
    }

    #[test]
    fn test_serialize_layout() {
        let packet = node_packet(b"hello");
        let frame = packet.serialize();

        assert_eq!(frame.len(), HEADER_SIZE + 5 + FOOTER_SIZE);
        assert_eq!(&frame[..HEADER_SIZE], &packet.header.encode());
        assert_eq!(&frame[HEADER_SIZE..HEADER_SIZE + 5], b"hello");
        let crc = crc16(&frame[..HEADER_SIZE + 5]);
        assert_eq!(frame[HEADER_SIZE + 5], (crc & 0xFF) as u8);
        assert_eq!(frame[HEADER_SIZE + 6], (crc >> 8) as u8);
    }

    #[test]
    fn test_serialize_truncates_to_declared_size() {
        let mut packet = node_packet(b"hello world");
        packet.header.payload_size = 5;
        let frame = packet.serialize();
        assert_eq!(frame.len(), HEADER_SIZE + 5 + FOOTER_SIZE);
        assert!(validate(&frame));
    }

    #[test]
    fn test_with_payload_rejects_oversize() {
        let result = Packet::with_payload(
            0,
            1,
            MessageType::GatewayMessageAck,
            1,
            1,
            &[0u8; MAX_PAYLOAD_SIZE + 1],
        );
        assert!(matches!(result, Err(DongleError::PayloadTooLarge { size: 129, max: 128 })));
    }

    #[test]
    fn test_parse_valid_frame() {
        let packet = node_packet(b"{\"t\":1}");
        let parsed = Packet::parse(&packet.serialize()).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.kind(), Some(MessageType::NodeMessageAck));
    }

    #[test]
    fn test_parse_rejects_bad_crc() {
        let mut frame = node_packet(b"abc").serialize();
        frame[HEADER_SIZE] ^= 0x01;
        let err = Packet::parse(&frame).unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn test_parse_rejects_size_mismatch() {
        // Correct CRC, but the payload size field claims more than present
        let mut body = PacketHeader::new(1, 0, MessageType::NodeMessageNoAck, 1, 1, 4).encode().to_vec();
        body.extend_from_slice(b"ab");
        append_crc(&mut body);
        assert!(Packet::parse(&body).is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_bounds_length() {
        assert!(Packet::parse(&[0u8; MIN_FRAME_SIZE - 1]).is_err());
        assert!(Packet::parse(&vec![0u8; MAX_FRAME_SIZE + 1]).is_err());
    }

    #[test]
    fn test_from_unsigned_ignores_trailing_bytes() {
        let mut buf = PacketHeader::new(0, 3, MessageType::GatewayMessageAck, 2, 5, 2).encode().to_vec();
        buf.extend_from_slice(b"okXX");
        let packet = Packet::from_unsigned(&buf).unwrap();
        assert_eq!(packet.payload(), b"ok");
        assert_eq!(packet.to_unsigned(), buf[..HEADER_SIZE + 2].to_vec());
    }

    #[test]
    fn test_from_unsigned_short_payload() {
        let mut buf = PacketHeader::new(0, 3, MessageType::GatewayMessageAck, 2, 5, 10).encode().to_vec();
        buf.extend_from_slice(b"short");
        assert!(matches!(Packet::from_unsigned(&buf), Err(DongleError::Protocol(_))));
    }

    #[test]
    fn test_serialize_ack_forces_zero_payload() {
        let header = PacketHeader::new(0, 9, MessageType::GatewayAck, 0x2222, 3, 17);
        let frame = serialize_ack(&header);
        assert_eq!(frame.len(), ACK_FRAME_SIZE);
        assert_eq!(frame[7], 0);
        assert!(validate(&frame));
    }

    #[test]
    fn test_gateway_ack_fields() {
        let frame = gateway_ack(0xABCD, 0x07, 0x0102);
        let header = PacketHeader::decode(&frame).unwrap();
        assert_eq!(header.emitter, NODE_ID_GATEWAY);
        assert_eq!(header.recipient, 0x07);
        assert_eq!(header.network_id, 0xABCD);
        assert_eq!(header.counter, 0x0102);
        assert_eq!(header.payload_size, 0);
        assert!(validate(&frame));
    }
}
