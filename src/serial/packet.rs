//! Application packets carried in serial frames.
//!
//! ```text
//! ┌───────────┬──────────────┬────────┬──────────────────┐
//! │ Packet ID │ Payload type │ Length │ Payload          │
//! │ uint16 LE │ 1 byte       │ 1 byte │ 0-128 bytes      │
//! └───────────┴──────────────┴────────┴──────────────────┘
//! ```

use bytes::Bytes;

use crate::error::{DongleError, Result};

/// Serial header size in bytes.
pub const SERIAL_HEADER_SIZE: usize = 4;

/// Largest payload carried in one serial packet.
pub const MAX_SERIAL_PAYLOAD: usize = 128;

/// Payload type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadType {
    Null = 0,
    Log = 1,
    System = 2,
    Wireless = 3,
}

impl PayloadType {
    /// Map a raw byte to a payload type.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Null),
            1 => Some(Self::Log),
            2 => Some(Self::System),
            3 => Some(Self::Wireless),
            _ => None,
        }
    }
}

/// Serial packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialHeader {
    pub packet_id: u16,
    /// Raw type byte, kept raw so unknown tags can be logged.
    pub payload_type: u8,
    pub length: u8,
}

impl SerialHeader {
    pub fn new(packet_id: u16, payload_type: PayloadType, length: u8) -> Self {
        Self {
            packet_id,
            payload_type: payload_type as u8,
            length,
        }
    }

    pub fn encode(&self) -> [u8; SERIAL_HEADER_SIZE] {
        let id = self.packet_id.to_le_bytes();
        [id[0], id[1], self.payload_type, self.length]
    }

    /// Decode a header; `None` if `buf` is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < SERIAL_HEADER_SIZE {
            return None;
        }
        Some(Self {
            packet_id: u16::from_le_bytes([buf[0], buf[1]]),
            payload_type: buf[2],
            length: buf[3],
        })
    }

    #[inline]
    pub fn kind(&self) -> Option<PayloadType> {
        PayloadType::from_u8(self.payload_type)
    }
}

/// A decoded serial packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPacket {
    pub header: SerialHeader,
    pub payload: Bytes,
}

impl SerialPacket {
    /// Build a packet; the payload must fit in 128 bytes.
    pub fn new(packet_id: u16, payload_type: PayloadType, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_SERIAL_PAYLOAD {
            return Err(DongleError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_SERIAL_PAYLOAD,
            });
        }
        Ok(Self {
            header: SerialHeader::new(packet_id, payload_type, payload.len() as u8),
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Parse a decoded frame body.
    ///
    /// The length field must agree with the bytes present and stay within
    /// the 128-byte payload limit.
    pub fn parse(body: &Bytes) -> Result<Self> {
        let header = SerialHeader::decode(body).ok_or_else(|| {
            DongleError::Protocol(format!(
                "Serial frame of {} bytes is shorter than its header",
                body.len()
            ))
        })?;
        let length = header.length as usize;
        if length > MAX_SERIAL_PAYLOAD || body.len() != SERIAL_HEADER_SIZE + length {
            return Err(DongleError::Protocol(format!(
                "Serial length field {} does not match {} payload bytes",
                length,
                body.len() - SERIAL_HEADER_SIZE
            )));
        }
        Ok(Self {
            header,
            payload: body.slice(SERIAL_HEADER_SIZE..),
        })
    }

    /// Header followed by payload, ready for byte stuffing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SERIAL_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    #[inline]
    pub fn kind(&self) -> Option<PayloadType> {
        self.header.kind()
    }
}
