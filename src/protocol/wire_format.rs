//! Wireless wire format encoding and decoding.
//!
//! Implements the 8-byte packet header:
//! ```text
//! ┌─────────┬───────────┬──────────┬────────────┬──────────┬──────────────┐
//! │ Emitter │ Recipient │ Msg type │ Network ID │ Counter  │ Payload size │
//! │ 1 byte  │ 1 byte    │ 1 byte   │ uint16 LE  │ uint16 LE│ 1 byte       │
//! └─────────┴───────────┴──────────┴────────────┴──────────┴──────────────┘
//! ```
//!
//! Followed by 0-128 payload bytes and a 2-byte CRC16 (low byte first).

use crate::error::{DongleError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Footer size in bytes (CRC16 only).
pub const FOOTER_SIZE: usize = 2;

/// Maximum payload carried by one wireless frame.
pub const MAX_PAYLOAD_SIZE: usize = 128;

/// Smallest frame accepted from the air (header + CRC).
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + FOOTER_SIZE;

/// Size of an ack frame (header with zero payload + CRC).
pub const ACK_FRAME_SIZE: usize = HEADER_SIZE + FOOTER_SIZE;

/// Largest frame accepted from or sent to the air.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + FOOTER_SIZE + MAX_PAYLOAD_SIZE;

/// Offset of the payload size byte inside the header.
pub const PAYLOAD_SIZE_INDEX: usize = 7;

/// Node id reserved for the gateway.
pub const NODE_ID_GATEWAY: u8 = 0x00;

/// Node id reserved for broadcast.
pub const NODE_ID_BROADCAST: u8 = 0xFF;

/// Wireless message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Node message, no ack expected.
    NodeMessageNoAck = 0x00,
    /// Node message, the gateway must ack.
    NodeMessageAck = 0x01,
    /// Gateway message, no ack expected.
    GatewayMessageNoAck = 0x02,
    /// Gateway message, the node must ack.
    GatewayMessageAck = 0x03,
    /// Ack sent by a node.
    NodeAck = 0x04,
    /// Ack sent by a gateway.
    GatewayAck = 0x06,
}

impl MessageType {
    /// Map a raw byte to a known message type.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::NodeMessageNoAck),
            0x01 => Some(Self::NodeMessageAck),
            0x02 => Some(Self::GatewayMessageNoAck),
            0x03 => Some(Self::GatewayMessageAck),
            0x04 => Some(Self::NodeAck),
            0x06 => Some(Self::GatewayAck),
            _ => None,
        }
    }

    /// Raw byte value.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the recipient is expected to answer with an ack.
    #[inline]
    pub fn requires_ack(self) -> bool {
        matches!(self, Self::NodeMessageAck | Self::GatewayMessageAck)
    }
}

/// Decoded wireless packet header.
///
/// `message_type` stays a raw byte so that unknown types survive decoding
/// and can be counted as protocol errors by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    /// Node that sent the packet.
    pub emitter: u8,
    /// Node the packet is addressed to.
    pub recipient: u8,
    /// Raw message type byte (see [`MessageType`]).
    pub message_type: u8,
    /// Network the packet belongs to.
    pub network_id: u16,
    /// Sender sequence counter.
    pub counter: u16,
    /// Number of payload bytes following the header.
    pub payload_size: u8,
}

impl PacketHeader {
    /// Create a new header.
    pub fn new(
        emitter: u8,
        recipient: u8,
        message_type: MessageType,
        network_id: u16,
        counter: u16,
        payload_size: u8,
    ) -> Self {
        Self {
            emitter,
            recipient,
            message_type: message_type.as_u8(),
            network_id,
            counter,
            payload_size,
        }
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use lorahome_dongle::protocol::{MessageType, PacketHeader};
    ///
    /// let header = PacketHeader::new(0x00, 0x05, MessageType::GatewayAck, 0x1234, 7, 0);
    /// let bytes = header.encode();
    /// assert_eq!(bytes, [0x00, 0x05, 0x06, 0x34, 0x12, 0x07, 0x00, 0x00]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.emitter;
        buf[1] = self.recipient;
        buf[2] = self.message_type;
        buf[3..5].copy_from_slice(&self.network_id.to_le_bytes());
        buf[5..7].copy_from_slice(&self.counter.to_le_bytes());
        buf[PAYLOAD_SIZE_INDEX] = self.payload_size;
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            emitter: buf[0],
            recipient: buf[1],
            message_type: buf[2],
            network_id: u16::from_le_bytes([buf[3], buf[4]]),
            counter: u16::from_le_bytes([buf[5], buf[6]]),
            payload_size: buf[PAYLOAD_SIZE_INDEX],
        })
    }

    /// Known message type, if any.
    #[inline]
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    /// Whether the packet is for the gateway (directly or by broadcast).
    #[inline]
    pub fn is_for_gateway(&self) -> bool {
        self.recipient == NODE_ID_GATEWAY || self.recipient == NODE_ID_BROADCAST
    }

    /// Full frame size implied by the payload size field.
    #[inline]
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.payload_size as usize + FOOTER_SIZE
    }

    /// Validate the payload size field.
    pub fn validate(&self) -> Result<()> {
        if self.payload_size as usize > MAX_PAYLOAD_SIZE {
            return Err(DongleError::PayloadTooLarge {
                size: self.payload_size as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(())
    }
}

/// Check that a received length is within the accepted frame bounds.
#[inline]
pub fn is_valid_frame_len(len: usize) -> bool {
    (MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&len)
}
